/// Account database model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account record in the credential store
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub enabled: bool,
    pub email_verified: bool,
    pub account_expired: bool,
    pub credentials_expired: bool,
    pub failed_login_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    pub force_password_change: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub current_login_at: Option<DateTime<Utc>>,
    pub current_login_ip: Option<String>,
    pub login_count: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Whether the account may log in at `now`. A lock that has already
    /// expired does not block; the caller resets it on success.
    pub fn is_loginable(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.account_expired
            && self.deleted_at.is_none()
            && !self.credentials_expired
            && self.locked_until.map_or(true, |until| until <= now)
    }

    /// Whether a temporary lock is currently active
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }
}
