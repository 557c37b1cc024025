/// Unified error types for the parkgate gateway core
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bad username/password, or account not loginable. Deliberately the
    /// same variant for "not found" and "wrong password" so account
    /// existence never leaks.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account temporarily locked after repeated failures
    #[error("Account locked")]
    AccountLocked { retry_after: std::time::Duration },

    /// Password correct but expired or flagged for forced change
    #[error("Credentials expired")]
    CredentialsExpired,

    /// Account administratively disabled
    #[error("Account disabled")]
    AccountDisabled,

    /// Token failed signature/shape/issuer checks
    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    /// Token past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Token jti present on the revocation list
    #[error("Token revoked")]
    TokenRevoked,

    /// Wrong token type for the operation (refresh used as access, etc.)
    #[error("Token type mismatch")]
    TokenTypeMismatch,

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Caller IP has an active suspicion entry
    #[error("Suspicious activity detected")]
    Suspicious,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Shared-store (Redis) errors
    #[error("Store error: {0}")]
    Store(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Short machine-readable reason used in audit records. Distinct for
    /// every token failure even though clients see a collapsed message.
    pub fn audit_reason(&self) -> &'static str {
        match self {
            GatewayError::InvalidCredentials => "invalid_credentials",
            GatewayError::AccountLocked { .. } => "account_locked",
            GatewayError::CredentialsExpired => "credentials_expired",
            GatewayError::AccountDisabled => "account_disabled",
            GatewayError::TokenInvalid(_) => "token_invalid",
            GatewayError::TokenExpired => "token_expired",
            GatewayError::TokenRevoked => "token_revoked",
            GatewayError::TokenTypeMismatch => "token_type_mismatch",
            GatewayError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GatewayError::Suspicious => "suspicious",
            GatewayError::Validation(_) => "validation",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Store(_) => "store_failure",
            GatewayError::Database(_) | GatewayError::Internal(_) | GatewayError::Io(_) => {
                "internal"
            }
        }
    }
}

/// Fixed JSON error envelope returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Convert GatewayError to HTTP response
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            GatewayError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "InvalidCredentials",
                self.to_string(),
            ),
            GatewayError::AccountLocked { retry_after } => (
                StatusCode::LOCKED,
                "AccountLocked",
                format!(
                    "Account locked, retry after {} seconds",
                    retry_after.as_secs()
                ),
            ),
            GatewayError::CredentialsExpired => (
                StatusCode::UNAUTHORIZED,
                "CredentialsExpired",
                "Password change required".to_string(),
            ),
            GatewayError::AccountDisabled => {
                (StatusCode::FORBIDDEN, "AccountDisabled", self.to_string())
            }
            // Token failures collapse to one client-facing message; the
            // audit trail keeps the distinct reason.
            GatewayError::TokenInvalid(_)
            | GatewayError::TokenExpired
            | GatewayError::TokenRevoked
            | GatewayError::TokenTypeMismatch => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                "Authentication required".to_string(),
            ),
            GatewayError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            GatewayError::Suspicious => (
                StatusCode::FORBIDDEN,
                "Suspicious",
                "Request blocked".to_string(),
            ),
            GatewayError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", msg.clone())
            }
            GatewayError::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFound", msg.clone()),
            GatewayError::Database(_)
            | GatewayError::Store(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorEnvelope::new(error_code, &message));

        (status, body).into_response()
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
