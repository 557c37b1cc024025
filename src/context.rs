/// Application context: the dependency container every handler sees
use crate::{
    account::AccountAuthenticator,
    audit::AuditTrail,
    config::ServerConfig,
    db,
    error::GatewayResult,
    security::SecurityFilter,
    store::{RedisStore, SessionStore},
    token::TokenService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub audit: Arc<AuditTrail>,
    pub tokens: Arc<TokenService>,
    pub authenticator: Arc<AccountAuthenticator>,
    pub security: Arc<SecurityFilter>,
}

impl AppContext {
    /// Build the production context: validate config, open the credential
    /// store, connect the shared store, wire the services and seed the
    /// bootstrap admin if needed.
    pub async fn new(config: ServerConfig) -> GatewayResult<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.storage.data_directory)?;

        let pool = db::create_pool(&config.storage.account_db, Default::default()).await?;
        db::init_schema(&pool).await?;
        db::test_connection(&pool).await?;

        let store = RedisStore::connect(&config.store).await?;
        tracing::info!(url = %config.store.redis_url, "Connected to shared store");

        Self::with_store(config, pool, Arc::new(store)).await
    }

    /// Wire the services around an already-open pool and store. The seam
    /// integration tests use to swap in the in-process store.
    pub async fn with_store(
        config: ServerConfig,
        pool: SqlitePool,
        store: Arc<dyn SessionStore>,
    ) -> GatewayResult<Self> {
        let auth_config = Arc::new(config.authentication.clone());

        let audit = Arc::new(AuditTrail::new(pool.clone()));
        let tokens = Arc::new(TokenService::new(
            auth_config.clone(),
            store,
            config.store.fail_closed,
            audit.clone(),
        ));
        let authenticator = Arc::new(AccountAuthenticator::new(
            pool.clone(),
            auth_config,
            audit.clone(),
        ));
        authenticator.bootstrap_admin().await?;

        let security = Arc::new(SecurityFilter::new(
            Arc::new(config.security.clone()),
            tokens.clone(),
            audit.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            audit,
            tokens,
            authenticator,
            security,
        })
    }
}
