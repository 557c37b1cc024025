/// Request middleware: client address resolution, bearer extraction and
/// the security filter wrapper
use crate::{context::AppContext, error::GatewayError, security::{Identity, RequestFacts}};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};

/// Client address after proxy-header resolution, attached to every
/// admitted request
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

/// Pull the token out of an `Authorization: Bearer ...` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve the client address: first X-Forwarded-For hop when present and
/// parseable, the socket peer otherwise
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

/// Security filter wrapper around every route. Rejections become the
/// standard error envelope; admitted requests carry `ClientIp` and, when
/// authenticated, `Identity` in their extensions.
pub async fn security_filter(
    State(ctx): State<AppContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer);
    let facts = RequestFacts {
        ip,
        path: request.uri().path().to_string(),
        bearer: extract_bearer_token(request.headers()),
    };

    match ctx.security.apply(&facts).await {
        Ok(identity) => {
            request.extensions_mut().insert(ClientIp(ip));
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Extractor for the identity the filter attached
pub struct AuthIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(AuthIdentity)
            .ok_or_else(|| GatewayError::TokenInvalid("Missing identity".to_string()))
    }
}
