/// Configuration management for the parkgate gateway
use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub security: SecurityConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration (credential store + audit log)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_secret: String,
    /// Optional key id stamped into the JWT header; extension point for
    /// future key rotation.
    pub token_key_id: Option<String>,
    pub token_issuer: String,
    pub token_audience: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    /// Consecutive failed logins before a temporary lock
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
    /// Passwords older than this require a change
    pub password_max_age_days: i64,
    /// Plaintext password for the bootstrap admin account; generated
    /// randomly when unset.
    pub bootstrap_admin_password: Option<String>,
}

/// Request security filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Requests allowed per IP in a rolling minute
    pub requests_per_minute: u32,
    /// Requests allowed per IP in a rolling hour
    pub requests_per_hour: u32,
    /// Failed authentications per hour before an IP is marked suspicious
    pub suspicion_threshold: u32,
    pub suspicion_window_minutes: i64,
    /// Exact IPs that bypass all checks. No implicit private-range trust:
    /// operators list infrastructure addresses explicitly.
    pub trusted_origins: Vec<String>,
    /// Path prefixes that skip token verification
    pub public_paths: Vec<String>,
}

/// Shared-store (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
    /// Upper bound on any single store round-trip
    pub timeout_ms: u64,
    /// When the store is unreachable during a revocation check: true
    /// rejects the token (fail-closed), false logs and accepts (fail-open).
    pub fail_closed: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GatewayResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GATEWAY_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| GatewayError::Validation("Invalid port number".to_string()))?;
        let version = env::var("GATEWAY_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("GATEWAY_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let account_db = env::var("GATEWAY_ACCOUNT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("accounts.sqlite"));

        let token_secret = env::var("GATEWAY_TOKEN_SECRET")
            .map_err(|_| GatewayError::Validation("Token secret required".to_string()))?;
        let token_key_id = env::var("GATEWAY_TOKEN_KEY_ID").ok();
        let token_issuer =
            env::var("GATEWAY_TOKEN_ISSUER").unwrap_or_else(|_| "parkgate".to_string());
        let token_audience =
            env::var("GATEWAY_TOKEN_AUDIENCE").unwrap_or_else(|_| "parking-api".to_string());

        let authentication = AuthConfig {
            token_secret,
            token_key_id,
            token_issuer,
            token_audience,
            access_token_ttl_secs: env_parse("GATEWAY_ACCESS_TOKEN_TTL_SECS", 3600),
            refresh_token_ttl_secs: env_parse("GATEWAY_REFRESH_TOKEN_TTL_SECS", 86400),
            max_failed_attempts: env_parse("GATEWAY_MAX_FAILED_ATTEMPTS", 5),
            lockout_minutes: env_parse("GATEWAY_LOCKOUT_MINUTES", 30),
            password_max_age_days: env_parse("GATEWAY_PASSWORD_MAX_AGE_DAYS", 90),
            bootstrap_admin_password: env::var("GATEWAY_ADMIN_PASSWORD").ok(),
        };

        let security = SecurityConfig {
            requests_per_minute: env_parse("GATEWAY_REQUESTS_PER_MINUTE", 60),
            requests_per_hour: env_parse("GATEWAY_REQUESTS_PER_HOUR", 1000),
            suspicion_threshold: env_parse("GATEWAY_SUSPICION_THRESHOLD", 10),
            suspicion_window_minutes: env_parse("GATEWAY_SUSPICION_WINDOW_MINUTES", 60),
            trusted_origins: env_list("GATEWAY_TRUSTED_ORIGINS", &[]),
            public_paths: env_list(
                "GATEWAY_PUBLIC_PATHS",
                &["/auth/login", "/auth/refresh", "/health", "/docs"],
            ),
        };

        let store = StoreConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: env::var("GATEWAY_STORE_KEY_PREFIX")
                .unwrap_or_else(|_| "parkgate:".to_string()),
            timeout_ms: env_parse("GATEWAY_STORE_TIMEOUT_MS", 500),
            fail_closed: env_parse("GATEWAY_STORE_FAIL_CLOSED", true),
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
            },
            authentication,
            security,
            store,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> GatewayResult<()> {
        if self.service.hostname.is_empty() {
            return Err(GatewayError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.authentication.token_secret.len() < 32 {
            return Err(GatewayError::Validation(
                "Token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.security.requests_per_minute == 0 || self.security.requests_per_hour == 0 {
            return Err(GatewayError::Validation(
                "Rate limit ceilings must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8080,
            version: "0.1.0".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            account_db: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            token_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
            token_key_id: None,
            token_issuer: "parkgate".to_string(),
            token_audience: "parking-api".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
            max_failed_attempts: 5,
            lockout_minutes: 30,
            password_max_age_days: 90,
            bootstrap_admin_password: None,
        },
        security: SecurityConfig {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            suspicion_threshold: 10,
            suspicion_window_minutes: 60,
            trusted_origins: vec![],
            public_paths: vec![
                "/auth/login".to_string(),
                "/auth/refresh".to_string(),
                "/health".to_string(),
                "/docs".to_string(),
            ],
        },
        store: StoreConfig {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "parkgate:".to_string(),
            timeout_ms: 500,
            fail_closed: true,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = test_config();
        config.authentication.token_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_trusted_origins_default_empty() {
        let config = test_config();
        assert!(config.security.trusted_origins.is_empty());
    }
}
