//! Inbound caller authentication.
//!
//! Every `/api` request carries a TokenX bearer token. It is verified against
//! the identity provider's JWKS; the key set is fetched lazily and kept for
//! an hour, and refetched early when a token names an unknown `kid`.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{AvtaleError, Result};

const JWKS_TTL: Duration = Duration::from_secs(3600);

/// An authenticated end user: national id plus the raw token, which is
/// needed for on-behalf-of exchanges further down.
#[derive(Debug, Clone, PartialEq)]
pub struct Innlogget {
    pub fnr: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct CallerClaims {
    #[serde(default)]
    pid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

/// Validator settings
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub jwks_url: String,
    pub issuer: String,
    /// Our own client id, the expected `aud`
    pub audience: String,
    /// Skip signature, issuer and audience checks
    pub dev_mode: bool,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

pub struct CallerTokenValidator {
    config: ValidatorConfig,
    http_client: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

impl CallerTokenValidator {
    pub fn new(config: ValidatorConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
            jwks: RwLock::new(None),
        }
    }

    /// Validate the value of an `Authorization` header
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Innlogget> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AvtaleError::Unauthorized("missing bearer token".into()))?;

        self.validate(token).await
    }

    /// Validate a raw bearer token
    pub async fn validate(&self, token: &str) -> Result<Innlogget> {
        let claims = if self.config.dev_mode {
            decode_unverified(token)?
        } else {
            self.decode_verified(token).await?
        };

        let fnr = claims
            .pid
            .or(claims.sub)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AvtaleError::Unauthorized("token has no subject".into()))?;

        Ok(Innlogget {
            fnr,
            token: token.to_string(),
        })
    }

    async fn decode_verified(&self, token: &str) -> Result<CallerClaims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AvtaleError::Unauthorized(format!("malformed token: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AvtaleError::Unauthorized("token has no kid".into()))?;

        let key = match self.cached_key(&kid).await {
            Some(key) => key,
            None => {
                self.refresh_jwks().await?;
                self.cached_key(&kid)
                    .await
                    .ok_or_else(|| AvtaleError::Unauthorized(format!("unknown signing key {kid}")))?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        jsonwebtoken::decode::<CallerClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AvtaleError::Unauthorized(format!("invalid token: {e}")))
    }

    async fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let jwks = self.jwks.read().await;
        let cached = jwks.as_ref()?;
        if cached.fetched_at.elapsed() > JWKS_TTL {
            return None;
        }
        let jwk = cached.keys.find(kid)?;
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(kid, error = %e, "Unusable key in JWKS");
                None
            }
        }
    }

    async fn refresh_jwks(&self) -> Result<()> {
        debug!(url = %self.config.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.config.jwks_url)
            .send()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("JWKS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AvtaleError::Upstream(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("invalid JWKS: {e}")))?;

        *self.jwks.write().await = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

fn decode_unverified(token: &str) -> Result<CallerClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;

    jsonwebtoken::decode::<CallerClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AvtaleError::Unauthorized(format!("invalid token: {e}")))
}
