/// Audit trail: append-only security event log plus per-IP failure counters
///
/// Events land in the `audit_event` table and are mirrored as tracing
/// events. The per-IP counters back the security filter's escalation
/// decision and are windowed, not cumulative.
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::net::IpAddr;
use uuid::Uuid;

/// Kinds of security-relevant events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    PasswordChange,
    TokenIssued,
    TokenRejected,
    TokenRevoked,
    Logout,
    RateLimited,
    SuspiciousActivity,
    ConfigChange,
    Bootstrap,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::LoginSuccess => "login_success",
            AuditKind::LoginFailure => "login_failure",
            AuditKind::AccountLocked => "account_locked",
            AuditKind::PasswordChange => "password_change",
            AuditKind::TokenIssued => "token_issued",
            AuditKind::TokenRejected => "token_rejected",
            AuditKind::TokenRevoked => "token_revoked",
            AuditKind::Logout => "logout",
            AuditKind::RateLimited => "rate_limited",
            AuditKind::SuspiciousActivity => "suspicious_activity",
            AuditKind::ConfigChange => "config_change",
            AuditKind::Bootstrap => "bootstrap",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Append-only audit log with windowed per-IP failure counters
pub struct AuditTrail {
    db: SqlitePool,
    failures: DashMap<IpAddr, FailureWindow>,
}

impl AuditTrail {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            failures: DashMap::new(),
        }
    }

    /// Append an event. Audit failures are logged, never propagated: a
    /// broken audit store must not turn into a request failure.
    pub async fn record(
        &self,
        kind: AuditKind,
        username: Option<&str>,
        ip: Option<IpAddr>,
        detail: &str,
    ) {
        tracing::info!(
            kind = kind.as_str(),
            username = username.unwrap_or("-"),
            ip = %ip.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
            detail,
            "audit"
        );

        let result = sqlx::query(
            "INSERT INTO audit_event (id, kind, username, ip, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(kind.as_str())
        .bind(username)
        .bind(ip.map(|i| i.to_string()))
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to append audit event: {}", e);
        }
    }

    /// Record one failed authentication from an IP, returning the count in
    /// the current window
    pub fn record_failure(&self, ip: IpAddr, window_minutes: i64) -> u32 {
        self.record_failure_at(ip, window_minutes, Utc::now())
    }

    pub(crate) fn record_failure_at(
        &self,
        ip: IpAddr,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> u32 {
        let mut entry = self.failures.entry(ip).or_insert(FailureWindow {
            window_start: now,
            count: 0,
        });
        if now - entry.window_start >= Duration::minutes(window_minutes) {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count
    }

    /// Failed authentications from an IP in its current window
    pub fn failed_attempt_count(&self, ip: IpAddr) -> u32 {
        self.failures.get(&ip).map_or(0, |w| w.count)
    }

    /// Whether the IP's failures have reached the threshold within the
    /// window. Returns true at most once per window: escalating resets the
    /// counter so the next window starts clean.
    pub fn should_escalate(&self, ip: IpAddr, threshold: u32, window_minutes: i64) -> bool {
        self.should_escalate_at(ip, threshold, window_minutes, Utc::now())
    }

    pub(crate) fn should_escalate_at(
        &self,
        ip: IpAddr,
        threshold: u32,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(mut entry) = self.failures.get_mut(&ip) else {
            return false;
        };
        if now - entry.window_start >= Duration::minutes(window_minutes) {
            entry.window_start = now;
            entry.count = 0;
            return false;
        }
        if entry.count >= threshold {
            entry.window_start = now;
            entry.count = 0;
            return true;
        }
        false
    }

    /// Drop counters whose window has lapsed; called from the sweep job
    pub fn sweep(&self, window_minutes: i64) {
        let now = Utc::now();
        self.failures
            .retain(|_, w| now - w.window_start < Duration::minutes(window_minutes));
    }
}
