//! Organization lookup against Enhetsregisteret
//!
//! `GET {base}/enheter/{orgnr}`: 200 is the organization, 404 is a valid
//! "not found", anything else is a lookup error. Found organizations are
//! cached for a week.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{TokenBroker, TokenPurpose};
use crate::types::{AvtaleError, Kommune, Lookup, Result};

#[async_trait]
pub trait OrganizationRegistry: Send + Sync {
    async fn resolve_organization(&self, orgnr: &str) -> Result<Lookup<Kommune>>;
}

/// Registry client configuration
#[derive(Debug, Clone)]
pub struct EregConfig {
    pub base_url: String,
    /// Attach a Maskinporten token (needed behind the registry gateway)
    pub use_maskinporten: bool,
    /// How long a found organization is kept (default: one week)
    pub cache_ttl: Duration,
    /// Maximum cache entries (default: 1000)
    pub max_cache_entries: usize,
}

impl EregConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            use_maskinporten: false,
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            max_cache_entries: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Organisasjonsform {
    kode: String,
}

#[derive(Debug, Deserialize)]
struct Enhet {
    organisasjonsnummer: String,
    navn: String,
    organisasjonsform: Organisasjonsform,
}

impl From<Enhet> for Kommune {
    fn from(enhet: Enhet) -> Self {
        Kommune {
            orgnr: enhet.organisasjonsnummer,
            navn: enhet.navn,
            organisasjonsform: enhet.organisasjonsform.kode,
        }
    }
}

struct CachedEnhet {
    kommune: Kommune,
    expires_at: Instant,
}

pub struct EregClient {
    config: EregConfig,
    http_client: reqwest::Client,
    broker: Option<Arc<dyn TokenBroker>>,
    cache: RwLock<HashMap<String, CachedEnhet>>,
}

impl EregClient {
    pub fn new(
        config: EregConfig,
        http_client: reqwest::Client,
        broker: Option<Arc<dyn TokenBroker>>,
    ) -> Self {
        Self {
            config,
            http_client,
            broker,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn get_cached(&self, orgnr: &str) -> Option<Kommune> {
        let cache = self.cache.read().await;
        cache
            .get(orgnr)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.kommune.clone())
    }

    async fn cache_kommune(&self, kommune: Kommune) {
        let mut cache = self.cache.write().await;

        if cache.len() >= self.config.max_cache_entries {
            cache.retain(|_, v| v.expires_at > Instant::now());

            if cache.len() >= self.config.max_cache_entries {
                let to_remove: Vec<_> = cache.keys().take(cache.len() / 2).cloned().collect();
                for key in to_remove {
                    cache.remove(&key);
                }
            }
        }

        cache.insert(
            kommune.orgnr.clone(),
            CachedEnhet {
                kommune,
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
    }
}

#[async_trait]
impl OrganizationRegistry for EregClient {
    async fn resolve_organization(&self, orgnr: &str) -> Result<Lookup<Kommune>> {
        if let Some(kommune) = self.get_cached(orgnr).await {
            debug!(orgnr = %orgnr, "Organization resolved from cache");
            return Ok(Lookup::Found(kommune));
        }

        let url = format!(
            "{}/enheter/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(orgnr)
        );

        let mut request = self.http_client.get(&url).header("Accept", "application/json");
        if self.config.use_maskinporten {
            if let Some(broker) = &self.broker {
                let token = broker.get_token(TokenPurpose::ClientCredentials).await?;
                request = request.bearer_auth(token.token);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| AvtaleError::RegistryLookup(format!("{orgnr}: {e}")))?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let enhet: Enhet = response
                    .json()
                    .await
                    .map_err(|e| AvtaleError::RegistryLookup(format!("{orgnr}: invalid body: {e}")))?;
                let kommune = Kommune::from(enhet);
                self.cache_kommune(kommune.clone()).await;
                Ok(Lookup::Found(kommune))
            }
            reqwest::StatusCode::NOT_FOUND => {
                debug!(orgnr = %orgnr, "Organization not in registry");
                Ok(Lookup::NotFound)
            }
            status => Err(AvtaleError::RegistryLookup(format!(
                "{orgnr}: registry returned {status}"
            ))),
        }
    }
}
