/// Router assembly and the serve loop
use crate::{api, context::AppContext, error::GatewayResult};
use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the full router with the security filter wrapped around every
/// route, public ones included (the filter itself decides what bypasses
/// token verification)
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api::routes())
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            api::middleware::security_filter,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": ctx.config.service.version,
    }))
}

pub async fn serve(ctx: AppContext) -> GatewayResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Gateway listening");

    let router = build_router(ctx);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
