/// Per-request security filter
///
/// An ordered pipeline over the facts of an incoming request. Step order
/// is load-bearing: trusted origins skip everything, rate limiting runs
/// before any authentication work, suspicion blocks even public paths,
/// and only then does a public-path prefix skip token verification.
use crate::{
    account::Role,
    audit::{AuditKind, AuditTrail},
    config::SecurityConfig,
    error::{GatewayError, GatewayResult},
    rate_limit::RateLimiter,
    token::TokenService,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// What the pipeline knows about a request before any decision
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub ip: IpAddr,
    pub path: String,
    pub bearer: Option<String>,
}

/// Verified caller identity attached to admitted requests
#[derive(Debug, Clone)]
pub struct Identity {
    pub account_id: String,
    pub username: String,
    pub role: Role,
}

/// Outcome of a single pipeline step
enum Decision {
    /// Hand over to the next step
    Continue,
    /// Admit the request, skipping the remaining steps
    Allow,
    /// Refuse the request
    Reject(GatewayError),
}

type Step = fn(&SecurityFilter, &RequestFacts, DateTime<Utc>) -> Decision;

/// Steps that run before token verification, in order
const PRE_TOKEN_STEPS: &[(&str, Step)] = &[
    ("trusted_origin", SecurityFilter::trusted_origin_step),
    ("rate_limit", SecurityFilter::rate_limit_step),
    ("suspicion", SecurityFilter::suspicion_step),
    ("public_path", SecurityFilter::public_path_step),
];

pub struct SecurityFilter {
    config: Arc<SecurityConfig>,
    limiter: RateLimiter,
    suspicion: DashMap<IpAddr, DateTime<Utc>>,
    tokens: Arc<TokenService>,
    audit: Arc<AuditTrail>,
}

impl SecurityFilter {
    pub fn new(
        config: Arc<SecurityConfig>,
        tokens: Arc<TokenService>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        let limiter = RateLimiter::new(config.requests_per_minute, config.requests_per_hour);
        Self {
            config,
            limiter,
            suspicion: DashMap::new(),
            tokens,
            audit,
        }
    }

    /// Run the full pipeline. `Ok(Some(identity))` admits an authenticated
    /// request, `Ok(None)` admits a bypassed one, `Err` refuses it. Every
    /// refusal emits exactly one audit event.
    pub async fn apply(&self, facts: &RequestFacts) -> GatewayResult<Option<Identity>> {
        self.apply_at(facts, Utc::now()).await
    }

    pub async fn apply_at(
        &self,
        facts: &RequestFacts,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<Identity>> {
        for (name, step) in PRE_TOKEN_STEPS {
            match step(self, facts, now) {
                Decision::Continue => {}
                Decision::Allow => {
                    tracing::trace!(step = name, ip = %facts.ip, path = %facts.path, "Request admitted");
                    return Ok(None);
                }
                Decision::Reject(err) => {
                    let kind = match &err {
                        GatewayError::RateLimitExceeded { .. } => AuditKind::RateLimited,
                        _ => AuditKind::SuspiciousActivity,
                    };
                    self.audit
                        .record(kind, None, Some(facts.ip), err.audit_reason())
                        .await;
                    return Err(err);
                }
            }
        }

        match &facts.bearer {
            None => {
                let err = GatewayError::TokenInvalid("Missing bearer token".to_string());
                self.auth_failure(facts, &err, now).await;
                Err(err)
            }
            Some(token) => match self.tokens.verify_access_token(token, facts.ip).await {
                Ok(verified) => {
                    let role = Role::parse(&verified.role)?;
                    Ok(Some(Identity {
                        account_id: verified.account_id,
                        username: verified.username,
                        role,
                    }))
                }
                Err(err) => {
                    self.auth_failure(facts, &err, now).await;
                    Err(err)
                }
            },
        }
    }

    fn trusted_origin_step(&self, facts: &RequestFacts, _now: DateTime<Utc>) -> Decision {
        let ip = facts.ip.to_string();
        let trusted = self
            .config
            .trusted_origins
            .iter()
            .any(|origin| ip == *origin || (origin.ends_with('.') && ip.starts_with(origin.as_str())));
        if trusted {
            Decision::Allow
        } else {
            Decision::Continue
        }
    }

    fn rate_limit_step(&self, facts: &RequestFacts, now: DateTime<Utc>) -> Decision {
        match self.limiter.check_at(facts.ip, now) {
            Ok(()) => Decision::Continue,
            Err(err) => Decision::Reject(err),
        }
    }

    fn suspicion_step(&self, facts: &RequestFacts, now: DateTime<Utc>) -> Decision {
        if self.is_suspicious_at(facts.ip, now) {
            Decision::Reject(GatewayError::Suspicious)
        } else {
            Decision::Continue
        }
    }

    fn public_path_step(&self, facts: &RequestFacts, _now: DateTime<Utc>) -> Decision {
        let public = self
            .config
            .public_paths
            .iter()
            .any(|prefix| facts.path.starts_with(prefix.as_str()));
        if public {
            Decision::Allow
        } else {
            Decision::Continue
        }
    }

    /// Record a failed authentication, escalating the address to
    /// suspicious once the windowed failure count reaches the threshold
    async fn auth_failure(&self, facts: &RequestFacts, err: &GatewayError, now: DateTime<Utc>) {
        self.audit
            .record(
                AuditKind::TokenRejected,
                None,
                Some(facts.ip),
                err.audit_reason(),
            )
            .await;

        self.audit
            .record_failure(facts.ip, self.config.suspicion_window_minutes);

        if self.audit.should_escalate(
            facts.ip,
            self.config.suspicion_threshold,
            self.config.suspicion_window_minutes,
        ) {
            self.mark_suspicious_at(facts.ip, now);
            self.audit
                .record(
                    AuditKind::SuspiciousActivity,
                    None,
                    Some(facts.ip),
                    "escalated_after_repeated_failures",
                )
                .await;
            tracing::warn!(ip = %facts.ip, "Address marked suspicious");
        }
    }

    pub fn mark_suspicious(&self, ip: IpAddr) {
        self.mark_suspicious_at(ip, Utc::now());
    }

    fn mark_suspicious_at(&self, ip: IpAddr, now: DateTime<Utc>) {
        self.suspicion.insert(ip, now);
    }

    pub fn is_suspicious(&self, ip: IpAddr) -> bool {
        self.is_suspicious_at(ip, Utc::now())
    }

    fn is_suspicious_at(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(self.config.suspicion_window_minutes);
        self.suspicion
            .get(&ip)
            .is_some_and(|marked_at| now - *marked_at < window)
    }

    /// Drop expired suspicion entries and idle rate windows
    pub fn sweep(&self) {
        let now = Utc::now();
        let window = Duration::minutes(self.config.suspicion_window_minutes);
        self.suspicion.retain(|_, marked_at| now - *marked_at < window);
        self.limiter.sweep();
        self.audit.sweep(self.config.suspicion_window_minutes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::Principal,
        config::test_config,
        db,
        store::MemoryStore,
    };

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 9));

    async fn setup() -> (SecurityFilter, Arc<TokenService>) {
        let config = test_config();
        let pool = db::test_pool().await;
        let audit = Arc::new(AuditTrail::new(pool));
        let tokens = Arc::new(TokenService::new(
            Arc::new(config.authentication),
            Arc::new(MemoryStore::new()),
            true,
            audit.clone(),
        ));
        (
            SecurityFilter::new(Arc::new(config.security), tokens.clone(), audit),
            tokens,
        )
    }

    async fn setup_trusting(origin: &str) -> SecurityFilter {
        let mut config = test_config();
        config.security.trusted_origins = vec![origin.to_string()];
        let pool = db::test_pool().await;
        let audit = Arc::new(AuditTrail::new(pool));
        let tokens = Arc::new(TokenService::new(
            Arc::new(config.authentication),
            Arc::new(MemoryStore::new()),
            true,
            audit.clone(),
        ));
        SecurityFilter::new(Arc::new(config.security), tokens, audit)
    }

    fn facts(path: &str, bearer: Option<String>) -> RequestFacts {
        RequestFacts {
            ip: IP,
            path: path.to_string(),
            bearer,
        }
    }

    #[tokio::test]
    async fn test_public_path_admits_without_token() {
        let (filter, _) = setup().await;
        let identity = filter.apply(&facts("/auth/login", None)).await.unwrap();
        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_protected_path_without_token_is_rejected() {
        let (filter, _) = setup().await;
        let err = filter
            .apply(&facts("/api/lots", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_identity() {
        let (filter, tokens) = setup().await;
        let principal = Principal {
            account_id: "acc-1".to_string(),
            username: "alice".to_string(),
            role: Role::Employee,
            requires_password_change: false,
        };
        let signed = tokens
            .issue_access_token(&principal, IP, "test-agent")
            .await
            .unwrap();

        let identity = filter
            .apply(&facts("/api/lots", Some(signed.token)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Employee);
    }

    #[tokio::test]
    async fn test_trusted_origin_bypasses_rate_limit() {
        let filter = setup_trusting(&IP.to_string()).await;
        let t0 = Utc::now();

        // Far past any ceiling, every request still admitted
        for i in 0..200 {
            let result = filter
                .apply_at(&facts("/api/lots", None), t0 + Duration::milliseconds(i))
                .await;
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_suspicion() {
        let (filter, _) = setup().await;
        let t0 = Utc::now();
        filter.mark_suspicious(IP);

        for i in 0..60 {
            let err = filter
                .apply_at(&facts("/api/lots", None), t0 + Duration::milliseconds(i))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Suspicious));
        }

        // Ceiling reached: the limiter answers before the suspicion check
        let err = filter
            .apply_at(&facts("/api/lots", None), t0 + Duration::milliseconds(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_public_path_does_not_bypass_rate_limit() {
        let (filter, _) = setup().await;
        let t0 = Utc::now();

        for i in 0..60 {
            filter
                .apply_at(&facts("/auth/login", None), t0 + Duration::milliseconds(i))
                .await
                .unwrap();
        }

        let err = filter
            .apply_at(&facts("/auth/login", None), t0 + Duration::milliseconds(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_suspicion_blocks_public_paths_too() {
        let (filter, _) = setup().await;
        filter.mark_suspicious(IP);

        let err = filter.apply(&facts("/auth/login", None)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Suspicious));
    }

    #[tokio::test]
    async fn test_repeated_auth_failures_escalate_to_suspicion() {
        let (filter, _) = setup().await;

        // Threshold is 10 failed authentications per hour
        for _ in 0..10 {
            let err = filter
                .apply(&facts("/api/lots", Some("garbage".to_string())))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::TokenInvalid(_)));
        }

        assert!(filter.is_suspicious(IP));
        let err = filter.apply(&facts("/api/lots", None)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Suspicious));
    }

    #[tokio::test]
    async fn test_suspicion_expires_after_window() {
        let (filter, _) = setup().await;
        let t0 = Utc::now();
        filter.mark_suspicious(IP);

        let err = filter
            .apply_at(&facts("/auth/login", None), t0 + Duration::minutes(30))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Suspicious));

        // Entry aged out; the request falls through to the public bypass
        let result = filter
            .apply_at(&facts("/auth/login", None), t0 + Duration::minutes(61))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
