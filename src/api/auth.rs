/// /auth/* handlers
use crate::{
    account::{
        ChangePasswordRequest, LoginRequest, LogoutRequest, MessageResponse, Principal,
        ProfileResponse, RefreshRequest, RefreshResponse, Role, TokenPairResponse,
    },
    api::middleware::{extract_bearer_token, AuthIdentity, ClientIp},
    audit::AuditKind,
    context::AppContext,
    error::{GatewayError, GatewayResult},
};
use axum::{
    extract::{Extension, State},
    http::{header, HeaderMap},
    Json,
};

fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// POST /auth/login
pub async fn login(
    State(ctx): State<AppContext>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> GatewayResult<Json<TokenPairResponse>> {
    let agent = user_agent(&headers);
    let principal = ctx
        .authenticator
        .authenticate(&body.username, &body.password, ip, agent)
        .await?;

    let access = ctx.tokens.issue_access_token(&principal, ip, agent).await?;
    let refresh = ctx
        .tokens
        .issue_refresh_token(&principal, ip, agent)
        .await?;

    Ok(Json(TokenPairResponse {
        access_token: access.token,
        refresh_token: refresh.token,
        expires_in_seconds: access.expires_in_secs,
    }))
}

/// POST /auth/refresh
///
/// The account is re-checked on every refresh so a lock or disable applied
/// after login cuts the session short.
pub async fn refresh(
    State(ctx): State<AppContext>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> GatewayResult<Json<RefreshResponse>> {
    let verified = ctx.tokens.verify_refresh_token(&body.refresh_token).await?;

    let account = ctx
        .authenticator
        .get_account(&verified.account_id)
        .await
        .map_err(|_| GatewayError::TokenInvalid("Unknown account".to_string()))?;
    if !account.is_loginable(chrono::Utc::now()) {
        return Err(GatewayError::TokenInvalid("Account not active".to_string()));
    }

    let principal = Principal {
        account_id: account.id.clone(),
        username: account.username.clone(),
        role: Role::parse(&account.role)?,
        requires_password_change: account.force_password_change,
    };
    let access = ctx
        .tokens
        .issue_access_token(&principal, ip, user_agent(&headers))
        .await?;

    Ok(Json(RefreshResponse {
        access_token: access.token,
        expires_in_seconds: access.expires_in_secs,
        token_type: "Bearer".to_string(),
    }))
}

/// POST /auth/logout
///
/// Revokes the presented access token and, when the body carries one, the
/// refresh token alongside it.
pub async fn logout(
    State(ctx): State<AppContext>,
    AuthIdentity(identity): AuthIdentity,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> GatewayResult<Json<MessageResponse>> {
    if let Some(token) = extract_bearer_token(&headers) {
        ctx.tokens.revoke(&token, "logout").await?;
    }
    if let Some(Json(LogoutRequest {
        refresh_token: Some(refresh),
    })) = body
    {
        ctx.tokens.revoke(&refresh, "logout").await?;
    }

    ctx.audit
        .record(AuditKind::Logout, Some(&identity.username), Some(ip), "logout")
        .await;

    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// POST /auth/logout-all
pub async fn logout_all(
    State(ctx): State<AppContext>,
    AuthIdentity(identity): AuthIdentity,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> GatewayResult<Json<MessageResponse>> {
    let revoked = ctx
        .tokens
        .revoke_all_for_account(&identity.account_id, "logout_all")
        .await?;

    ctx.audit
        .record(
            AuditKind::Logout,
            Some(&identity.username),
            Some(ip),
            "logout_all",
        )
        .await;

    Ok(Json(MessageResponse {
        message: format!("Revoked {revoked} sessions"),
    }))
}

/// POST /auth/change-password
pub async fn change_password(
    State(ctx): State<AppContext>,
    AuthIdentity(identity): AuthIdentity,
    Json(body): Json<ChangePasswordRequest>,
) -> GatewayResult<Json<MessageResponse>> {
    ctx.authenticator
        .change_password(&identity.account_id, &body.current_password, &body.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "Password changed".to_string(),
    }))
}

/// GET /auth/profile
pub async fn profile(
    State(ctx): State<AppContext>,
    AuthIdentity(identity): AuthIdentity,
) -> GatewayResult<Json<ProfileResponse>> {
    let account = ctx.authenticator.get_account(&identity.account_id).await?;

    Ok(Json(ProfileResponse {
        id: account.id,
        username: account.username,
        email: account.email,
        role: account.role,
        last_login_at: account.last_login_at,
        requires_password_change: account.force_password_change,
    }))
}
