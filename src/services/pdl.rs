//! Person lookup in PDL
//!
//! Only the signer's full name is needed. It is fetched on behalf of the
//! caller with the `hentPerson` GraphQL query.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{Innlogget, TokenBroker, TokenPurpose};
use crate::types::{AvtaleError, Result};

const HENT_NAVN_QUERY: &str = "query($ident: ID!) { hentPerson(ident: $ident) { navn(historikk: false) { fornavn mellomnavn etternavn } } }";

#[async_trait]
pub trait PersonRegistry: Send + Sync {
    /// `fornavn [mellomnavn] etternavn` of the logged in user
    async fn full_name(&self, innlogget: &Innlogget) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct PdlConfig {
    pub url: String,
    pub audience: String,
    /// Processing purpose registered for this service, sent as `Behandlingsnummer`
    pub behandlingsnummer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Navn {
    fornavn: String,
    #[serde(default)]
    mellomnavn: Option<String>,
    etternavn: String,
}

impl Navn {
    fn full(&self) -> String {
        [Some(self.fornavn.as_str()), self.mellomnavn.as_deref(), Some(self.etternavn.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Deserialize)]
struct Person {
    #[serde(default)]
    navn: Vec<Navn>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HentPersonData {
    hent_person: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<HentPersonData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

pub struct PdlClient {
    config: PdlConfig,
    http_client: reqwest::Client,
    broker: Arc<dyn TokenBroker>,
}

impl PdlClient {
    pub fn new(config: PdlConfig, http_client: reqwest::Client, broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            config,
            http_client,
            broker,
        }
    }
}

#[async_trait]
impl PersonRegistry for PdlClient {
    async fn full_name(&self, innlogget: &Innlogget) -> Result<String> {
        let token = self
            .broker
            .get_token(TokenPurpose::OnBehalfOf {
                subject_token: &innlogget.token,
                audience: &self.config.audience,
            })
            .await?;

        let body = json!({
            "query": HENT_NAVN_QUERY,
            "variables": { "ident": innlogget.fnr },
        });

        let mut request = self
            .http_client
            .post(&self.config.url)
            .bearer_auth(&token.token)
            .json(&body);
        if let Some(behandlingsnummer) = &self.config.behandlingsnummer {
            request = request.header("Behandlingsnummer", behandlingsnummer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("PDL: {e}")))?;
        if !response.status().is_success() {
            return Err(AvtaleError::Upstream(format!(
                "PDL returned {}",
                response.status()
            )));
        }

        let parsed: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("PDL response: {e}")))?;

        if let Some(first) = parsed.errors.first() {
            return Err(AvtaleError::Upstream(format!("PDL: {}", first.message)));
        }

        parsed
            .data
            .and_then(|d| d.hent_person)
            .and_then(|p| p.navn.into_iter().next())
            .map(|navn| navn.full())
            .ok_or_else(|| AvtaleError::Upstream("PDL returned no name".into()))
    }
}
