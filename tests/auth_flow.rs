//! End-to-end scenarios through the real router: login, lockout,
//! token lifecycle, refresh, logout and the security filter, backed by an
//! in-memory credential store and the in-process session store.
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use parkgate::{
    config::{
        AuthConfig, LoggingConfig, SecurityConfig, ServerConfig, ServiceConfig, StorageConfig,
        StoreConfig,
    },
    context::AppContext,
    db,
    server::build_router,
    store::MemoryStore,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "Bootstrap-Pass-1!";
const NEW_PASSWORD: &str = "Rotated-Pass-22!";

fn test_server_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 0,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("."),
            account_db: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            token_secret: "integration-test-secret-0123456789abcdef".to_string(),
            token_key_id: None,
            token_issuer: "parkgate".to_string(),
            token_audience: "parking-api".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
            max_failed_attempts: 5,
            lockout_minutes: 30,
            password_max_age_days: 90,
            bootstrap_admin_password: Some(ADMIN_PASSWORD.to_string()),
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
            redis_url: String::new(),
            key_prefix: "parkgate:".to_string(),
            timeout_ms: 500,
            fail_closed: true,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
        },
    }
}

async fn setup() -> (Router, AppContext) {
    setup_with(test_server_config()).await
}

async fn setup_with(config: ServerConfig) -> (Router, AppContext) {
    let pool = db::memory_pool().await.unwrap();
    let ctx = AppContext::with_store(config, pool, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    (build_router(ctx.clone()), ctx)
}

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000)))
}

async fn send(
    router: &Router,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", "203.0.113.50")
        .extension(peer());
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(router: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        router,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await
}

#[tokio::test]
async fn test_health_is_public() {
    let (router, _ctx) = setup().await;
    let (status, body) = send(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_bootstrap_admin_rotates_its_seeded_password() {
    let (router, _ctx) = setup().await;

    // Seeded admin logs in and is flagged for a password change
    let (status, tokens) = login(&router, "admin", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let access = tokens["accessToken"].as_str().unwrap().to_string();

    let (status, profile) = send(&router, "GET", "/auth/profile", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["requiresPasswordChange"], true);
    assert_eq!(profile["role"], "ADMIN");

    let (status, _) = send(
        &router,
        "POST",
        "/auth/change-password",
        Some(&access),
        Some(json!({ "currentPassword": ADMIN_PASSWORD, "newPassword": NEW_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Old password dead, new one live, flag cleared
    let (status, _) = login(&router, "admin", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, tokens) = login(&router, "admin", NEW_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let access = tokens["accessToken"].as_str().unwrap().to_string();
    let (_, profile) = send(&router, "GET", "/auth/profile", Some(&access), None).await;
    assert_eq!(profile["requiresPasswordChange"], false);
}

#[tokio::test]
async fn test_lockout_blocks_sixth_attempt_and_heals_after_window() {
    let (router, ctx) = setup().await;

    for _ in 0..5 {
        let (status, body) = login(&router, "admin", "Wrong-Password-0!").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "InvalidCredentials");
    }

    // Correct password, but the lock is active: 423
    let (status, body) = login(&router, "admin", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "AccountLocked");
    assert!(body["timestamp"].as_str().is_some());

    // Simulate the 30-minute lockout elapsing
    sqlx::query("UPDATE account SET locked_until = ?1 WHERE username = 'admin'")
        .bind(Utc::now() - Duration::minutes(1))
        .execute(&ctx.db)
        .await
        .unwrap();

    let (status, _) = login(&router, "admin", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let attempts: i64 =
        sqlx::query_scalar("SELECT failed_login_attempts FROM account WHERE username = 'admin'")
            .fetch_one(&ctx.db)
            .await
            .unwrap();
    assert_eq!(attempts, 0);
}

#[tokio::test]
async fn test_protected_route_requires_valid_token() {
    let (router, _ctx) = setup().await;

    let (status, body) = send(&router, "GET", "/auth/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationRequired");
    assert_eq!(body["message"], "Authentication required");

    let (status, body) =
        send(&router, "GET", "/auth/profile", Some("not.a.token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationRequired");
}

#[tokio::test]
async fn test_refresh_issues_a_working_access_token() {
    let (router, _ctx) = setup().await;

    let (_, tokens) = login(&router, "admin", ADMIN_PASSWORD).await;
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

    let (status, refreshed) = send(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["tokenType"], "Bearer");

    let access = refreshed["accessToken"].as_str().unwrap().to_string();
    let (status, profile) = send(&router, "GET", "/auth/profile", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["username"], "admin");
}

#[tokio::test]
async fn test_access_token_rejected_when_used_to_refresh() {
    let (router, _ctx) = setup().await;

    let (_, tokens) = login(&router, "admin", ADMIN_PASSWORD).await;
    let access = tokens["accessToken"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refreshToken": access })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_both_tokens() {
    let (router, _ctx) = setup().await;

    let (_, tokens) = login(&router, "admin", ADMIN_PASSWORD).await;
    let access = tokens["accessToken"].as_str().unwrap().to_string();
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "POST",
        "/auth/logout",
        Some(&access),
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, "GET", "/auth/profile", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_all_kills_every_session() {
    let (router, _ctx) = setup().await;

    let (_, first) = login(&router, "admin", ADMIN_PASSWORD).await;
    let (_, second) = login(&router, "admin", ADMIN_PASSWORD).await;
    let access_1 = first["accessToken"].as_str().unwrap().to_string();
    let access_2 = second["accessToken"].as_str().unwrap().to_string();

    let (status, _) = send(&router, "POST", "/auth/logout-all", Some(&access_1), None).await;
    assert_eq!(status, StatusCode::OK);

    for access in [&access_1, &access_2] {
        let (status, _) = send(&router, "GET", "/auth/profile", Some(access), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_weak_new_password_is_rejected() {
    let (router, _ctx) = setup().await;

    let (_, tokens) = login(&router, "admin", ADMIN_PASSWORD).await;
    let access = tokens["accessToken"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        "/auth/change-password",
        Some(&access),
        Some(json!({ "currentPassword": ADMIN_PASSWORD, "newPassword": "weak" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");
}

#[tokio::test]
async fn test_rate_limit_answers_429_at_the_ceiling() {
    let mut config = test_server_config();
    config.security.requests_per_minute = 5;
    let (router, _ctx) = setup_with(config).await;

    for _ in 0..5 {
        let (status, _) = send(&router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RateLimitExceeded");
}

#[tokio::test]
async fn test_trusted_origin_skips_every_check() {
    let mut config = test_server_config();
    config.security.requests_per_minute = 1;
    config.security.trusted_origins = vec!["203.0.113.50".to_string()];
    let (router, _ctx) = setup_with(config).await;

    for _ in 0..10 {
        let (status, _) = send(&router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_audit_trail_records_the_login_story() {
    let (router, ctx) = setup().await;

    let _ = login(&router, "admin", "Wrong-Password-0!").await;
    let _ = login(&router, "admin", ADMIN_PASSWORD).await;

    let kinds: Vec<String> =
        sqlx::query_scalar("SELECT kind FROM audit_event ORDER BY created_at")
            .fetch_all(&ctx.db)
            .await
            .unwrap();
    assert!(kinds.contains(&"bootstrap".to_string()));
    assert!(kinds.contains(&"login_failure".to_string()));
    assert!(kinds.contains(&"login_success".to_string()));
    assert!(kinds.contains(&"token_issued".to_string()));
}
