//! Token broker for outbound calls.
//!
//! Two flows:
//! - on-behalf-of: the caller's TokenX token is exchanged for one scoped to a
//!   downstream audience. Never cached, each exchange result is handed back.
//! - client credentials: a Maskinporten JWT grant for the service itself.
//!   The result is cached in one mutex-guarded cell and refreshed when it
//!   expires within [`EXPIRY_MARGIN_SECS`].
//!
//! The cache lock is held for the whole check-and-refresh, so concurrent
//! callers wait for a single refresh instead of each issuing one.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeDelta, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::assertion::ClientAssertionSigner;
use super::endpoint::{TokenEndpoint, TokenError, TokenResponse};
use crate::retry::{retry, RetryPolicy};
use crate::types::{AvtaleError, Result};

/// Refresh the cached token when it expires within this many seconds
pub const EXPIRY_MARGIN_SECS: i64 = 120;

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

/// An access token and the instant it stops being valid
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token valid for `expires_in` seconds after `now`. `None` when the
    /// expiry is not a representable instant.
    pub fn valid_for(token: String, expires_in: i64, now: DateTime<Utc>) -> Option<Self> {
        let expires_at = TimeDelta::try_seconds(expires_in).and_then(|d| now.checked_add_signed(d))?;
        Some(Self { token, expires_at })
    }

    fn from_response(
        response: TokenResponse,
        now: DateTime<Utc>,
    ) -> std::result::Result<Self, TokenError> {
        let expires_in = response.expires_in;
        Self::valid_for(response.access_token, expires_in, now).ok_or_else(|| {
            TokenError::InvalidResponse(format!("expires_in out of range: {expires_in}"))
        })
    }

    /// True when `now + margin` is past the expiry
    pub fn expires_within(&self, margin_secs: i64, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(margin_secs) > self.expires_at
    }
}

/// What a token is needed for
#[derive(Debug, Clone, Copy)]
pub enum TokenPurpose<'a> {
    /// Exchange the caller's token for one valid at `audience`
    OnBehalfOf {
        subject_token: &'a str,
        audience: &'a str,
    },
    /// The service's own Maskinporten token. Issuer and scopes are fixed by
    /// the configured [`ClientCredentialsFlow`].
    ClientCredentials,
}

#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn get_token(&self, purpose: TokenPurpose<'_>) -> Result<AccessToken>;
}

/// TokenX token exchange settings
pub struct TokenExchangeFlow {
    pub signer: ClientAssertionSigner,
    pub endpoint: Arc<dyn TokenEndpoint>,
}

/// Maskinporten JWT grant settings
pub struct ClientCredentialsFlow {
    pub signer: ClientAssertionSigner,
    pub endpoint: Arc<dyn TokenEndpoint>,
    /// Maskinporten issuer, the `aud` of the grant
    pub issuer: String,
    pub scopes: Vec<String>,
}

/// Token broker backed by real OAuth2 endpoints
pub struct OAuthTokenBroker {
    exchange: Option<TokenExchangeFlow>,
    client_credentials: Option<ClientCredentialsFlow>,
    cached: Mutex<Option<AccessToken>>,
    retry_policy: RetryPolicy,
}

impl OAuthTokenBroker {
    pub fn new(
        exchange: Option<TokenExchangeFlow>,
        client_credentials: Option<ClientCredentialsFlow>,
    ) -> Self {
        Self {
            exchange,
            client_credentials,
            cached: Mutex::new(None),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    async fn exchange(&self, subject_token: &str, audience: &str) -> Result<AccessToken> {
        let flow = self
            .exchange
            .as_ref()
            .ok_or_else(|| AvtaleError::AuthBroker("token exchange is not configured".into()))?;

        let response = retry(self.retry_policy, TokenError::is_retryable, move || async move {
            let assertion = flow.signer.client_assertion(flow.endpoint.url())?;
            let form = vec![
                ("grant_type", TOKEN_EXCHANGE_GRANT.to_string()),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()),
                ("client_assertion", assertion),
                ("subject_token_type", SUBJECT_TOKEN_TYPE.to_string()),
                ("subject_token", subject_token.to_string()),
                ("audience", audience.to_string()),
            ];
            flow.endpoint.request(form).await
        })
        .await?;

        debug!(audience, "Exchanged token on behalf of caller");
        Ok(AccessToken::from_response(response, Utc::now())?)
    }

    async fn client_credentials(&self) -> Result<AccessToken> {
        let flow = self.client_credentials.as_ref().ok_or_else(|| {
            AvtaleError::AuthBroker("client credentials flow is not configured".into())
        })?;

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(EXPIRY_MARGIN_SECS, Utc::now()) {
                return Ok(token.clone());
            }
        }

        let response = retry(self.retry_policy, TokenError::is_retryable, move || async move {
            let assertion = flow.signer.jwt_grant(&flow.issuer, &flow.scopes)?;
            let form = vec![
                ("grant_type", JWT_BEARER_GRANT.to_string()),
                ("assertion", assertion),
            ];
            flow.endpoint.request(form).await
        })
        .await?;

        let token = AccessToken::from_response(response, Utc::now())?;
        info!(expires_at = %token.expires_at, "Refreshed client credentials token");
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl TokenBroker for OAuthTokenBroker {
    async fn get_token(&self, purpose: TokenPurpose<'_>) -> Result<AccessToken> {
        match purpose {
            TokenPurpose::OnBehalfOf {
                subject_token,
                audience,
            } => self.exchange(subject_token, audience).await,
            TokenPurpose::ClientCredentials => self.client_credentials().await,
        }
    }
}

/// Development broker: hands the caller's token through unchanged and uses a
/// fixed service token. Only wired up in dev mode.
#[derive(Debug, Clone)]
pub struct PassthroughTokenBroker {
    service_token: String,
}

impl PassthroughTokenBroker {
    pub fn new(service_token: impl Into<String>) -> Self {
        Self {
            service_token: service_token.into(),
        }
    }
}

#[async_trait]
impl TokenBroker for PassthroughTokenBroker {
    async fn get_token(&self, purpose: TokenPurpose<'_>) -> Result<AccessToken> {
        let token = match purpose {
            TokenPurpose::OnBehalfOf { subject_token, .. } => subject_token.to_string(),
            TokenPurpose::ClientCredentials => self.service_token.clone(),
        };
        Ok(AccessToken {
            token,
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_keys::{TEST_KEY_ID, TEST_PRIVATE_KEY};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Counts requests and answers with a fixed lifetime
    struct CountingEndpoint {
        calls: AtomicU32,
        expires_in: i64,
        fail_first: u32,
        last_form: std::sync::Mutex<Vec<(&'static str, String)>>,
    }

    impl CountingEndpoint {
        fn new(expires_in: i64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                expires_in,
                fail_first: 0,
                last_form: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn field(&self, key: &str) -> Option<String> {
            self.last_form
                .lock()
                .unwrap()
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        fn url(&self) -> &str {
            "https://idp.test/token"
        }

        async fn request(
            &self,
            form: Vec<(&'static str, String)>,
        ) -> std::result::Result<TokenResponse, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_form.lock().unwrap() = form;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n <= self.fail_first {
                return Err(TokenError::Rejected {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(TokenResponse {
                access_token: format!("token-{n}"),
                expires_in: self.expires_in,
                scope: None,
                token_type: Some("Bearer".into()),
            })
        }
    }

    fn signer() -> ClientAssertionSigner {
        ClientAssertionSigner::from_rsa_pem("avtaler", TEST_KEY_ID, TEST_PRIVATE_KEY).unwrap()
    }

    fn client_credentials_broker(endpoint: Arc<CountingEndpoint>) -> OAuthTokenBroker {
        OAuthTokenBroker::new(
            None,
            Some(ClientCredentialsFlow {
                signer: signer(),
                endpoint,
                issuer: "https://maskinporten.test/".into(),
                scopes: vec!["nav:avtaler".into()],
            }),
        )
        .with_retry_policy(RetryPolicy::new(5, Duration::from_millis(1)))
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let token = AccessToken {
            token: "t".into(),
            expires_at: now + ChronoDuration::seconds(100),
        };
        assert!(token.expires_within(EXPIRY_MARGIN_SECS, now));

        let fresh = AccessToken {
            token: "t".into(),
            expires_at: now + ChronoDuration::seconds(600),
        };
        assert!(!fresh.expires_within(EXPIRY_MARGIN_SECS, now));
    }

    #[test]
    fn test_out_of_range_lifetime_is_rejected() {
        let now = Utc::now();
        assert!(AccessToken::valid_for("t".into(), i64::MAX, now).is_none());
        assert!(AccessToken::valid_for("t".into(), i64::MIN, now).is_none());
        assert_eq!(
            AccessToken::valid_for("t".into(), 60, now).map(|t| t.expires_at),
            Some(now + ChronoDuration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_without_caching() {
        let endpoint = Arc::new(CountingEndpoint::new(i64::MAX));
        let broker = client_credentials_broker(endpoint.clone());

        let first = broker.get_token(TokenPurpose::ClientCredentials).await;
        let second = broker.get_token(TokenPurpose::ClientCredentials).await;

        assert!(matches!(first, Err(AvtaleError::AuthBroker(msg)) if msg.contains("expires_in")));
        assert!(second.is_err());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_credentials_token_is_cached() {
        let endpoint = Arc::new(CountingEndpoint::new(3600));
        let broker = client_credentials_broker(endpoint.clone());

        let first = broker.get_token(TokenPurpose::ClientCredentials).await.unwrap();
        let second = broker.get_token(TokenPurpose::ClientCredentials).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.field("grant_type").as_deref(), Some(JWT_BEARER_GRANT));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let endpoint = Arc::new(CountingEndpoint::new(3600));
        let broker = Arc::new(client_credentials_broker(endpoint.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    broker
                        .get_token(TokenPurpose::ClientCredentials)
                        .await
                        .unwrap()
                        .token
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "token-1");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        // Expires in 60s, which is already inside the 120s margin
        let endpoint = Arc::new(CountingEndpoint::new(60));
        let broker = client_credentials_broker(endpoint.clone());

        let first = broker.get_token(TokenPurpose::ClientCredentials).await.unwrap();
        let second = broker.get_token(TokenPurpose::ClientCredentials).await.unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut endpoint = CountingEndpoint::new(3600);
        endpoint.fail_first = 2;
        let endpoint = Arc::new(endpoint);
        let broker = client_credentials_broker(endpoint.clone());

        let token = broker.get_token(TokenPurpose::ClientCredentials).await.unwrap();
        assert_eq!(token.token, "token-3");
    }

    #[tokio::test]
    async fn test_exchange_is_not_cached() {
        let endpoint = Arc::new(CountingEndpoint::new(3600));
        let broker = OAuthTokenBroker::new(
            Some(TokenExchangeFlow {
                signer: signer(),
                endpoint: endpoint.clone(),
            }),
            None,
        );

        let purpose = TokenPurpose::OnBehalfOf {
            subject_token: "user-token",
            audience: "dev-gcp:team:altinn",
        };
        broker.get_token(purpose).await.unwrap();
        broker.get_token(purpose).await.unwrap();

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
        assert_eq!(endpoint.field("subject_token").as_deref(), Some("user-token"));
        assert_eq!(endpoint.field("audience").as_deref(), Some("dev-gcp:team:altinn"));
        assert_eq!(endpoint.field("grant_type").as_deref(), Some(TOKEN_EXCHANGE_GRANT));
    }

    #[tokio::test]
    async fn test_unconfigured_flow_is_auth_broker_error() {
        let broker = OAuthTokenBroker::new(None, None);
        let err = broker
            .get_token(TokenPurpose::ClientCredentials)
            .await
            .unwrap_err();
        assert!(matches!(err, AvtaleError::AuthBroker(_)));
    }
}
