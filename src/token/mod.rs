/// Token model: claims, token kinds, verification result
pub mod service;

pub use service::TokenService;

use serde::{Deserialize, Serialize};

/// Token kind carried inside the claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    #[serde(rename = "ACCESS")]
    Access,
    #[serde(rename = "REFRESH")]
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "ACCESS",
            TokenType::Refresh => "REFRESH",
        }
    }
}

/// JWT claims. Immutable once signed; logical destruction happens only
/// through the revocation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token id (uuid v4), key into revocation and session registries
    pub jti: String,
    pub iss: String,
    /// Username
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub account_id: String,
    pub role: String,
    pub token_type: TokenType,
    /// IP observed at issuance; mismatches at verification are logged,
    /// never rejected (NAT and mobile handoffs change addresses)
    pub client_ip: String,
    /// Hex SHA-256 of the user agent, empty when unknown
    pub device: String,
}

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub jti: String,
    pub account_id: String,
    pub username: String,
    pub role: String,
    pub token_type: TokenType,
    pub expires_at: i64,
}

impl From<TokenClaims> for VerifiedToken {
    fn from(claims: TokenClaims) -> Self {
        Self {
            jti: claims.jti,
            account_id: claims.account_id,
            username: claims.sub,
            role: claims.role,
            token_type: claims.token_type,
            expires_at: claims.exp,
        }
    }
}

/// A freshly signed token together with its registry handle
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub jti: String,
    pub expires_in_secs: u64,
}
