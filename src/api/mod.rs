/// HTTP API surface
pub mod auth;
pub mod middleware;

use crate::context::AppContext;
use axum::{
    routing::{get, post},
    Router,
};

/// All /auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/profile", get(auth::profile))
}
