/// Account authentication system
///
/// Credential verification, lockout state, password changes and the
/// administrator bootstrap routine.

mod authenticator;

pub use authenticator::AccountAuthenticator;

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Employee,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Employee => "EMPLOYEE",
            Role::Client => "CLIENT",
        }
    }

    pub fn parse(s: &str) -> GatewayResult<Self> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "EMPLOYEE" => Ok(Role::Employee),
            "CLIENT" => Ok(Role::Client),
            other => Err(GatewayError::Internal(format!("Unknown role: {other}"))),
        }
    }
}

/// The resolved, authenticated identity returned by a successful login
#[derive(Debug, Clone)]
pub struct Principal {
    pub account_id: String,
    pub username: String,
    pub role: Role,
    pub requires_password_change: bool,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response: a fresh access/refresh pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: u64,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token refresh response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in_seconds: u64,
    pub token_type: String,
}

/// Optional logout body carrying the refresh token to revoke alongside
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Simple message response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Password change request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Profile response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub last_login_at: Option<chrono::DateTime<chrono::Utc>>,
    pub requires_password_change: bool,
}
