/// Token issuance, verification and distributed revocation
use crate::{
    account::Principal,
    audit::{AuditKind, AuditTrail},
    config::AuthConfig,
    error::{GatewayError, GatewayResult},
    store::{keys, MemoryStore, SessionStore},
    token::{SignedToken, TokenClaims, TokenType, VerifiedToken},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Token service backed by a shared store. Every instance of the gateway
/// sees the same revocation list and session registry; the in-process
/// fallback only covers short store outages and is never authoritative
/// while the store answers.
pub struct TokenService {
    config: Arc<AuthConfig>,
    store: Arc<dyn SessionStore>,
    fallback: MemoryStore,
    /// Reject tokens when the revocation list is unreachable
    fail_closed: bool,
    audit: Arc<AuditTrail>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<dyn SessionStore>,
        fail_closed: bool,
        audit: Arc<AuditTrail>,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(config.token_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.token_secret.as_bytes());
        Self {
            config,
            store,
            fallback: MemoryStore::new(),
            fail_closed,
            audit,
            encoding_key,
            decoding_key,
        }
    }

    /// Issue a short-lived access token and register its jti in the
    /// account's session set
    pub async fn issue_access_token(
        &self,
        principal: &Principal,
        client_ip: IpAddr,
        user_agent: &str,
    ) -> GatewayResult<SignedToken> {
        let ttl = self.config.access_token_ttl_secs;
        let signed = self.sign(principal, TokenType::Access, ttl, client_ip, user_agent)?;

        // Registry writes degrade to the fallback cache; a signed token
        // must not be lost to a store hiccup
        let session_key = keys::sessions(&principal.account_id);
        if let Err(e) = self.store.set_add(&session_key, &signed.jti, ttl).await {
            tracing::warn!(error = %e, jti = %signed.jti, "Session registry write failed, using fallback");
        }
        let _ = self.fallback.set_add(&session_key, &signed.jti, ttl).await;

        self.audit
            .record(
                AuditKind::TokenIssued,
                Some(&principal.username),
                Some(client_ip),
                "access",
            )
            .await;

        Ok(signed)
    }

    /// Issue a refresh token and record it in the live-refresh registry.
    /// A refresh token is only honored while its registry entry exists.
    pub async fn issue_refresh_token(
        &self,
        principal: &Principal,
        client_ip: IpAddr,
        user_agent: &str,
    ) -> GatewayResult<SignedToken> {
        let ttl = self.config.refresh_token_ttl_secs;
        let signed = self.sign(principal, TokenType::Refresh, ttl, client_ip, user_agent)?;

        let refresh_key = keys::refresh(&signed.jti);
        if let Err(e) = self
            .store
            .set_ex(&refresh_key, &principal.account_id, ttl)
            .await
        {
            tracing::warn!(error = %e, jti = %signed.jti, "Refresh registry write failed, using fallback");
        }
        let _ = self
            .fallback
            .set_ex(&refresh_key, &principal.account_id, ttl)
            .await;

        self.audit
            .record(
                AuditKind::TokenIssued,
                Some(&principal.username),
                Some(client_ip),
                "refresh",
            )
            .await;

        Ok(signed)
    }

    /// Verify an access token. An IP different from the one at issuance is
    /// logged but never rejected: NAT and mobile handoffs change addresses
    /// mid-session.
    pub async fn verify_access_token(
        &self,
        token: &str,
        client_ip: IpAddr,
    ) -> GatewayResult<VerifiedToken> {
        let claims = self.decode_strict(token)?;

        if claims.token_type != TokenType::Access {
            return Err(GatewayError::TokenTypeMismatch);
        }

        if !claims.client_ip.is_empty() && claims.client_ip != client_ip.to_string() {
            tracing::info!(
                username = %claims.sub,
                issued_ip = %claims.client_ip,
                current_ip = %client_ip,
                "Token presented from a different address"
            );
        }

        self.check_revocation(&claims.jti).await?;

        Ok(claims.into())
    }

    /// Verify a refresh token: signature and type checks plus the jti must
    /// still exist in the live-refresh registry
    pub async fn verify_refresh_token(&self, token: &str) -> GatewayResult<VerifiedToken> {
        let claims = self.decode_strict(token)?;

        if claims.token_type != TokenType::Refresh {
            return Err(GatewayError::TokenTypeMismatch);
        }

        self.check_revocation(&claims.jti).await?;

        let refresh_key = keys::refresh(&claims.jti);
        match self.store.exists(&refresh_key).await {
            Ok(true) => {}
            Ok(false) => return Err(GatewayError::TokenRevoked),
            Err(e) => {
                if self.fail_closed {
                    tracing::warn!(error = %e, "Refresh registry unreachable, rejecting");
                    return Err(GatewayError::TokenRevoked);
                }
                tracing::warn!(error = %e, "Refresh registry unreachable, consulting fallback");
                if !self.fallback.exists(&refresh_key).await.unwrap_or(false) {
                    return Err(GatewayError::TokenRevoked);
                }
            }
        }

        Ok(claims.into())
    }

    /// Revoke a single token. The token must carry a valid signature but
    /// may already be expired; revoking twice is a no-op.
    pub async fn revoke(&self, token: &str, reason: &str) -> GatewayResult<()> {
        let claims = self.decode_lenient(token)?;

        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        let revocation_key = keys::revocation(&claims.jti);

        let _ = self
            .fallback
            .set_ex(&revocation_key, reason, remaining)
            .await;
        self.store
            .set_ex(&revocation_key, reason, remaining)
            .await?;

        if claims.token_type == TokenType::Refresh {
            let refresh_key = keys::refresh(&claims.jti);
            if let Err(e) = self.store.delete(&refresh_key).await {
                tracing::warn!(error = %e, jti = %claims.jti, "Refresh registry delete failed");
            }
            let _ = self.fallback.delete(&refresh_key).await;
        }

        self.audit
            .record(AuditKind::TokenRevoked, Some(&claims.sub), None, reason)
            .await;

        Ok(())
    }

    /// Revoke every access token registered to an account, then clear the
    /// session set. Revoke-then-clear ordering means a concurrent read of
    /// the set cannot resurrect a member the caller already revoked.
    pub async fn revoke_all_for_account(
        &self,
        account_id: &str,
        reason: &str,
    ) -> GatewayResult<u32> {
        let session_key = keys::sessions(account_id);
        let members = self.store.set_members(&session_key).await?;

        // Remaining lifetimes are not tracked per member; the full access
        // TTL is a safe superset
        let ttl = self.config.access_token_ttl_secs;
        let mut revoked = 0u32;
        for jti in &members {
            let revocation_key = keys::revocation(jti);
            let _ = self.fallback.set_ex(&revocation_key, reason, ttl).await;
            self.store.set_ex(&revocation_key, reason, ttl).await?;
            revoked += 1;
        }

        self.store.delete(&session_key).await?;
        let _ = self.fallback.delete(&session_key).await;

        self.audit
            .record(AuditKind::TokenRevoked, None, None, reason)
            .await;

        Ok(revoked)
    }

    /// Drop expired entries from the in-process fallback cache
    pub fn sweep_fallback(&self) {
        self.fallback.sweep();
    }

    fn sign(
        &self,
        principal: &Principal,
        token_type: TokenType,
        ttl_secs: u64,
        client_ip: IpAddr,
        user_agent: &str,
    ) -> GatewayResult<SignedToken> {
        let now = Utc::now().timestamp();
        let jti = Uuid::new_v4().to_string();

        let claims = TokenClaims {
            jti: jti.clone(),
            iss: self.config.token_issuer.clone(),
            sub: principal.username.clone(),
            aud: self.config.token_audience.clone(),
            iat: now,
            exp: now + ttl_secs as i64,
            account_id: principal.account_id.clone(),
            role: principal.role.as_str().to_string(),
            token_type,
            client_ip: client_ip.to_string(),
            device: device_fingerprint(user_agent),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.config.token_key_id.clone();

        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("Token signing failed: {e}")))?;

        Ok(SignedToken {
            token,
            jti,
            expires_in_secs: ttl_secs,
        })
    }

    fn decode_strict(&self, token: &str) -> GatewayResult<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.token_issuer]);
        validation.set_audience(&[&self.config.token_audience]);

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(GatewayError::TokenExpired),
                _ => Err(GatewayError::TokenInvalid(e.to_string())),
            },
        }
    }

    /// Decode for revocation: expired tokens still parse, the signature
    /// and issuer must hold
    fn decode_lenient(&self, token: &str) -> GatewayResult<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.token_issuer]);
        validation.set_audience(&[&self.config.token_audience]);
        validation.validate_exp = false;

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| GatewayError::TokenInvalid(e.to_string()))
    }

    /// Revocation-list lookup with one retry. On a double failure the
    /// fail-closed policy rejects; fail-open logs, consults the fallback
    /// and otherwise accepts.
    async fn check_revocation(&self, jti: &str) -> GatewayResult<()> {
        let revocation_key = keys::revocation(jti);

        let revoked = match self.store.exists(&revocation_key).await {
            Ok(v) => Ok(v),
            Err(first) => {
                tracing::warn!(error = %first, "Revocation check failed, retrying");
                self.store.exists(&revocation_key).await
            }
        };

        match revoked {
            Ok(true) => Err(GatewayError::TokenRevoked),
            Ok(false) => Ok(()),
            Err(e) => {
                if self.fail_closed {
                    tracing::error!(error = %e, "Revocation list unreachable, rejecting token");
                    return Err(GatewayError::TokenRevoked);
                }
                tracing::warn!(error = %e, "Revocation list unreachable, consulting fallback");
                if self.fallback.exists(&revocation_key).await.unwrap_or(false) {
                    return Err(GatewayError::TokenRevoked);
                }
                Ok(())
            }
        }
    }
}

/// Stable per-client fingerprint; empty when the agent is unknown
fn device_fingerprint(user_agent: &str) -> String {
    if user_agent.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}
