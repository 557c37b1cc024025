//! parkgate: authentication and access-control core for a parking-lot
//! management backend.
//!
//! Four pieces: the account authenticator (credentials, lockout state,
//! password changes), the token service (signed bearer tokens with a
//! distributed revocation list), the audit trail, and the per-request
//! security filter that ties them together in front of every route.

pub mod account;
pub mod api;
pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod rate_limit;
pub mod security;
pub mod server;
pub mod store;
pub mod token;
