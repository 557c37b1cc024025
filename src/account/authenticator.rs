/// Account authenticator: credential verification and lockout state
///
/// Uses sqlx runtime query building throughout so no DATABASE_URL is
/// needed at compile time.
use crate::{
    account::{Principal, Role},
    audit::{AuditKind, AuditTrail},
    config::AuthConfig,
    db::account::Account,
    error::{GatewayError, GatewayResult},
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

/// bcrypt work factor; deliberately expensive
const BCRYPT_COST: u32 = 12;

/// Minimum accepted password length
const MIN_PASSWORD_LEN: usize = 12;

/// Account authenticator service
pub struct AccountAuthenticator {
    db: SqlitePool,
    config: Arc<AuthConfig>,
    audit: Arc<AuditTrail>,
}

impl AccountAuthenticator {
    pub fn new(db: SqlitePool, config: Arc<AuthConfig>, audit: Arc<AuditTrail>) -> Self {
        Self { db, config, audit }
    }

    /// Seed a single administrator account when the credential store is
    /// empty. The password comes from configuration or is generated and
    /// logged exactly once.
    pub async fn bootstrap_admin(&self) -> GatewayResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account")
            .fetch_one(&self.db)
            .await
            .map_err(GatewayError::Database)?;

        if count > 0 {
            return Ok(());
        }

        let (password, generated) = match &self.config.bootstrap_admin_password {
            Some(p) => (p.clone(), false),
            None => (generate_random_password(24), true),
        };

        self.create_account("admin", "admin@parkgate.local", &password, Role::Admin, true)
            .await?;

        if generated {
            tracing::warn!(
                "Bootstrapped administrator account 'admin' with generated password: {}",
                password
            );
        } else {
            tracing::info!("Bootstrapped administrator account 'admin'");
        }

        self.audit
            .record(AuditKind::Bootstrap, Some("admin"), None, "admin_seeded")
            .await;

        Ok(())
    }

    /// Create a new account. Provisioning proper lives outside the
    /// gateway; this is the seam it and the bootstrap routine use.
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
        force_password_change: bool,
    ) -> GatewayResult<Account> {
        let password_hash = bcrypt::hash(password, BCRYPT_COST)
            .map_err(|e| GatewayError::Internal(format!("Password hashing failed: {e}")))?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO account (id, username, email, password_hash, role, enabled,
                email_verified, account_expired, credentials_expired,
                failed_login_attempts, locked_until, password_changed_at,
                force_password_change, login_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 0, 0, 0, NULL, ?6, ?7, 0, ?8)",
        )
        .bind(&id)
        .bind(username)
        .bind(email)
        .bind(&password_hash)
        .bind(role.as_str())
        .bind(now)
        .bind(force_password_change)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        self.get_account(&id).await
    }

    /// Authenticate a login attempt
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
        client_ip: IpAddr,
        user_agent: &str,
    ) -> GatewayResult<Principal> {
        let now = Utc::now();

        let Some(account) = self.get_account_by_identifier(login).await? else {
            // Identical failure for unknown accounts: no existence leak
            self.audit
                .record(
                    AuditKind::LoginFailure,
                    Some(login),
                    Some(client_ip),
                    "invalid_credentials",
                )
                .await;
            return Err(GatewayError::InvalidCredentials);
        };

        // An active temporary lock takes precedence over everything,
        // including a correct password
        if let Some(until) = account.locked_until {
            if until > now {
                let retry_after = (until - now).to_std().unwrap_or_default();
                self.audit
                    .record(
                        AuditKind::LoginFailure,
                        Some(&account.username),
                        Some(client_ip),
                        "account_locked",
                    )
                    .await;
                return Err(GatewayError::AccountLocked { retry_after });
            }
        }

        if !account.is_loginable(now) {
            self.audit
                .record(
                    AuditKind::LoginFailure,
                    Some(&account.username),
                    Some(client_ip),
                    "not_loginable",
                )
                .await;
            return Err(GatewayError::InvalidCredentials);
        }

        let valid = bcrypt::verify(password, &account.password_hash)
            .map_err(|e| GatewayError::Internal(format!("Password verification failed: {e}")))?;

        if !valid {
            return Err(self.register_failed_attempt(&account, client_ip, now).await?);
        }

        // Expiry is checked only after the password verified, so the
        // caller can tell expired-but-correct credentials apart. Counters
        // stay untouched on this path.
        let max_age = Duration::days(self.config.password_max_age_days);
        if account.password_changed_at + max_age < now {
            self.audit
                .record(
                    AuditKind::LoginFailure,
                    Some(&account.username),
                    Some(client_ip),
                    "credentials_expired",
                )
                .await;
            return Err(GatewayError::CredentialsExpired);
        }

        // Success: reset the failure counter, clear any stale lock, roll
        // login bookkeeping
        sqlx::query(
            "UPDATE account SET failed_login_attempts = 0, locked_until = NULL,
                last_login_at = current_login_at, last_login_ip = current_login_ip,
                current_login_at = ?1, current_login_ip = ?2, login_count = login_count + 1
             WHERE id = ?3",
        )
        .bind(now)
        .bind(client_ip.to_string())
        .bind(&account.id)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        self.audit
            .record(
                AuditKind::LoginSuccess,
                Some(&account.username),
                Some(client_ip),
                user_agent,
            )
            .await;

        Ok(Principal {
            account_id: account.id.clone(),
            username: account.username.clone(),
            role: Role::parse(&account.role)?,
            requires_password_change: account.force_password_change,
        })
    }

    /// Record a failed password attempt, applying the temporary lock once
    /// the counter reaches the threshold
    async fn register_failed_attempt(
        &self,
        account: &Account,
        client_ip: IpAddr,
        now: chrono::DateTime<Utc>,
    ) -> GatewayResult<GatewayError> {
        let attempts = account.failed_login_attempts as u32 + 1;

        if attempts >= self.config.max_failed_attempts {
            let locked_until = now + Duration::minutes(self.config.lockout_minutes);
            sqlx::query(
                "UPDATE account SET failed_login_attempts = ?1, locked_until = ?2 WHERE id = ?3",
            )
            .bind(attempts as i64)
            .bind(locked_until)
            .bind(&account.id)
            .execute(&self.db)
            .await
            .map_err(GatewayError::Database)?;

            self.audit
                .record(
                    AuditKind::AccountLocked,
                    Some(&account.username),
                    Some(client_ip),
                    &format!("locked_until={locked_until}"),
                )
                .await;
        } else {
            sqlx::query("UPDATE account SET failed_login_attempts = ?1 WHERE id = ?2")
                .bind(attempts as i64)
                .bind(&account.id)
                .execute(&self.db)
                .await
                .map_err(GatewayError::Database)?;
        }

        self.audit
            .record(
                AuditKind::LoginFailure,
                Some(&account.username),
                Some(client_ip),
                "invalid_credentials",
            )
            .await;

        Ok(GatewayError::InvalidCredentials)
    }

    /// Change an account's password after reverifying the current one
    pub async fn change_password(
        &self,
        account_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> GatewayResult<()> {
        let account = self.get_account(account_id).await?;

        let valid = bcrypt::verify(current_password, &account.password_hash)
            .map_err(|e| GatewayError::Internal(format!("Password verification failed: {e}")))?;
        if !valid {
            return Err(GatewayError::InvalidCredentials);
        }

        validate_password_policy(new_password)?;

        let password_hash = bcrypt::hash(new_password, BCRYPT_COST)
            .map_err(|e| GatewayError::Internal(format!("Password hashing failed: {e}")))?;

        sqlx::query(
            "UPDATE account SET password_hash = ?1, password_changed_at = ?2,
                force_password_change = 0, credentials_expired = 0
             WHERE id = ?3",
        )
        .bind(&password_hash)
        .bind(Utc::now())
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        self.audit
            .record(
                AuditKind::PasswordChange,
                Some(&account.username),
                None,
                "password_changed",
            )
            .await;

        Ok(())
    }

    /// Get account by id
    pub async fn get_account(&self, id: &str) -> GatewayResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM account WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(GatewayError::Database)?
            .ok_or_else(|| GatewayError::NotFound("Account not found".to_string()))
    }

    /// Find account by username or email
    async fn get_account_by_identifier(&self, identifier: &str) -> GatewayResult<Option<Account>> {
        sqlx::query_as::<_, Account>(
            "SELECT * FROM account WHERE username = ?1 OR email = ?1",
        )
        .bind(identifier)
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)
    }
}

/// Password policy: minimum length plus all four character classes
pub fn validate_password_policy(password: &str) -> GatewayResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GatewayError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(GatewayError::Validation(
            "Password must contain an uppercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(GatewayError::Validation(
            "Password must contain a lowercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(GatewayError::Validation(
            "Password must contain a digit".to_string(),
        ));
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err(GatewayError::Validation(
            "Password must contain a symbol".to_string(),
        ));
    }
    Ok(())
}

/// Generate a random alphanumeric password
fn generate_random_password(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                             abcdefghijklmnopqrstuvwxyz\
                             0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
