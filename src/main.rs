use parkgate::{config::ServerConfig, context::AppContext, error::GatewayResult, jobs, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        hostname = %config.service.hostname,
        port = config.service.port,
        "Starting parkgate"
    );

    let ctx = AppContext::new(config).await?;

    jobs::JobScheduler::new(ctx.clone()).start();

    server::serve(ctx).await
}
