/// Database layer for parkgate
///
/// Manages the SQLite connection pool for the credential store and the
/// audit log, plus schema initialization.

pub mod account;

use crate::error::{GatewayError, GatewayResult};
use sqlx::sqlite::SqlitePool;
use std::path::Path;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> GatewayResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePool::connect_with(
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(if options.enable_wal {
                sqlx::sqlite::SqliteJournalMode::Wal
            } else {
                sqlx::sqlite::SqliteJournalMode::Delete
            })
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5)),
    )
    .await
    .map_err(GatewayError::Database)?;

    Ok(pool)
}

/// Create the schema. Idempotent; runs at every startup.
pub async fn init_schema(pool: &SqlitePool) -> GatewayResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS account (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            email_verified BOOLEAN NOT NULL DEFAULT 0,
            account_expired BOOLEAN NOT NULL DEFAULT 0,
            credentials_expired BOOLEAN NOT NULL DEFAULT 0,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME,
            password_changed_at DATETIME NOT NULL,
            force_password_change BOOLEAN NOT NULL DEFAULT 0,
            last_login_at DATETIME,
            last_login_ip TEXT,
            current_login_at DATETIME,
            current_login_ip TEXT,
            login_count INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL,
            deleted_at DATETIME
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(GatewayError::Database)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_event (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            username TEXT,
            ip TEXT,
            detail TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(GatewayError::Database)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_event_ip ON audit_event(ip, created_at)")
        .execute(pool)
        .await
        .map_err(GatewayError::Database)?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> GatewayResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(GatewayError::Database)?;

    Ok(())
}

/// In-memory pool with schema, for tests. Every connection to `:memory:`
/// opens a distinct database, so the pool is pinned to a single
/// never-reaped connection.
pub async fn memory_pool() -> GatewayResult<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(":memory:")
        .await
        .map_err(GatewayError::Database)?;
    init_schema(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    memory_pool().await.unwrap()
}
