/// Redis-backed shared store
use crate::config::StoreConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::store::SessionStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Shared store client backed by Redis. Every round-trip is bounded by the
/// configured timeout so token verification can never hang a request.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: &StoreConfig) -> GatewayResult<Self> {
        info!("Connecting to Redis at {}", config.redis_url);

        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            GatewayError::Store(format!("Redis client creation failed: {e}"))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            GatewayError::Store(format!("Redis connection failed: {e}"))
        })?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run a store operation under the configured deadline
    async fn bounded<T, F>(&self, op: &str, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Redis {} failed: {}", op, e);
                Err(GatewayError::Store(format!("{op} failed: {e}")))
            }
            Err(_) => {
                warn!("Redis {} timed out after {:?}", op, self.timeout);
                Err(GatewayError::Store(format!("{op} timed out")))
            }
        }
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> GatewayResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded("SETEX", conn.set_ex(&key, value, ttl_secs))
            .await
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded("GET", conn.get(&key)).await
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded::<(), _>("DEL", conn.del(&key)).await
    }

    async fn exists(&self, key: &str) -> GatewayResult<bool> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded("EXISTS", conn.exists(&key)).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl_secs: u64) -> GatewayResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded::<(), _>("SADD", conn.sadd(&key, member))
            .await?;

        // Extend the set TTL, never shorten it
        let current: i64 = self.bounded("TTL", conn.ttl(&key)).await?;
        if current < ttl_secs as i64 {
            self.bounded::<(), _>("EXPIRE", conn.expire(&key, ttl_secs as i64))
                .await?;
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> GatewayResult<Vec<String>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.bounded("SMEMBERS", conn.smembers(&key)).await
    }
}
