/// Shared key-value store for cross-instance token state
///
/// The revocation list, the live-refresh registry and the per-account
/// session sets must be agreed on by every gateway instance, so they live
/// behind this trait: Redis in production, an in-process map as the
/// short-lived degradation fallback and in tests.

pub mod memory;
pub mod redis;

use crate::error::GatewayResult;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Logical key namespaces shared by all gateway instances
pub mod keys {
    /// Revoked token ids; value is the revocation reason
    pub fn revocation(jti: &str) -> String {
        format!("revocation:{jti}")
    }

    /// Live refresh tokens; value is the owning account id
    pub fn refresh(jti: &str) -> String {
        format!("refresh:{jti}")
    }

    /// Set of access-token jtis currently issued to an account
    pub fn sessions(account_id: &str) -> String {
        format!("sessions:{account_id}")
    }
}

/// Durable key-value operations with TTL and set support
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a string value with a TTL in seconds
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> GatewayResult<()>;

    /// Fetch a string value
    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    /// Remove a key (value or set); missing keys are not an error
    async fn delete(&self, key: &str) -> GatewayResult<()>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> GatewayResult<bool>;

    /// Add a member to a set, extending the set's TTL to at least
    /// `ttl_secs` but never shortening it; the set must outlive its
    /// longest-lived member
    async fn set_add(&self, key: &str, member: &str, ttl_secs: u64) -> GatewayResult<()>;

    /// All members of a set; empty when the key is missing
    async fn set_members(&self, key: &str) -> GatewayResult<Vec<String>>;
}
