//! Entitlement resolution against Altinn
//!
//! A user may act for an organization when Altinn reports the organization
//! as a reportee for our signing service. Absence of access is never an
//! error: any failure yields an empty grant list, which downstream reads as
//! "no access". Every resolved list is written to the audit trail.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{Innlogget, TokenBroker, TokenPurpose};
use crate::logging::{AuditEvent, AuditEventType};
use crate::types::Avgiver;

/// OData filter for active, non-person reportees
const REPORTEE_FILTER: &str = "Type ne 'Person' and Status eq 'Active'";

/// An Altinn service identified by code and edition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltinnTjeneste {
    pub code: String,
    pub edition: String,
}

impl AltinnTjeneste {
    pub fn new(code: impl Into<String>, edition: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            edition: edition.into(),
        }
    }
}

#[async_trait]
pub trait EntitlementResolver: Send + Sync {
    /// Municipalities the user holds `tjeneste` for. Empty on any failure.
    async fn list_grants_for(&self, innlogget: &Innlogget, tjeneste: &AltinnTjeneste) -> Vec<Avgiver>;

    /// The service whose grant counts as the right to sign agreements
    fn signing_service(&self) -> &AltinnTjeneste;

    /// Whether the user may sign on behalf of `orgnr`
    async fn has_signing_right(&self, innlogget: &Innlogget, orgnr: &str) -> bool {
        let tjeneste = self.signing_service().clone();
        self.list_grants_for(innlogget, &tjeneste)
            .await
            .iter()
            .any(|avgiver| avgiver.orgnr == orgnr)
    }

    /// Municipalities the user may sign for
    async fn signable_kommuner(&self, innlogget: &Innlogget) -> Vec<Avgiver> {
        let tjeneste = self.signing_service().clone();
        self.list_grants_for(innlogget, &tjeneste).await
    }
}

/// Altinn client configuration
#[derive(Debug, Clone)]
pub struct AltinnConfig {
    pub base_url: String,
    /// Token exchange audience for the Altinn proxy
    pub audience: String,
    /// Optional gateway API key, sent as `ApiKey`
    pub api_key: Option<String>,
    pub signing_service: AltinnTjeneste,
    /// `$top` page size
    pub page_size: u32,
}

pub struct AltinnClient {
    config: AltinnConfig,
    http_client: reqwest::Client,
    broker: Arc<dyn TokenBroker>,
}

impl AltinnClient {
    pub fn new(config: AltinnConfig, http_client: reqwest::Client, broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            config,
            http_client,
            broker,
        }
    }

    async fn fetch_reportees(
        &self,
        innlogget: &Innlogget,
        tjeneste: &AltinnTjeneste,
    ) -> Result<Vec<Avgiver>, String> {
        let token = self
            .broker
            .get_token(TokenPurpose::OnBehalfOf {
                subject_token: &innlogget.token,
                audience: &self.config.audience,
            })
            .await
            .map_err(|e| e.to_string())?;

        let url = format!(
            "{}/api/serviceowner/reportees",
            self.config.base_url.trim_end_matches('/')
        );
        let top = self.config.page_size.to_string();

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&token.token)
            .header("Accept", "application/hal+json")
            .query(&[
                ("subject", innlogget.fnr.as_str()),
                ("serviceCode", tjeneste.code.as_str()),
                ("serviceEdition", tjeneste.edition.as_str()),
                ("$filter", REPORTEE_FILTER),
                ("$top", top.as_str()),
            ]);
        if let Some(key) = &self.config.api_key {
            request = request.header("ApiKey", key);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Altinn returned {status}: {body}"));
        }

        response
            .json::<Vec<Avgiver>>()
            .await
            .map_err(|e| format!("invalid reportee list: {e}"))
    }
}

#[async_trait]
impl EntitlementResolver for AltinnClient {
    async fn list_grants_for(&self, innlogget: &Innlogget, tjeneste: &AltinnTjeneste) -> Vec<Avgiver> {
        let grants = if innlogget.token.is_empty() {
            debug!("No caller token, no grants");
            Vec::new()
        } else {
            match self.fetch_reportees(innlogget, tjeneste).await {
                Ok(reportees) => reportees.into_iter().filter(Avgiver::is_kommune).collect(),
                Err(e) => {
                    warn!(service_code = %tjeneste.code, error = %e, "Could not resolve Altinn grants");
                    Vec::new()
                }
            }
        };

        AuditEvent::new(AuditEventType::GrantsResolved)
            .with_subject(&innlogget.fnr)
            .with_service_code(&tjeneste.code)
            .with_orgnrs(grants.iter().map(|g| g.orgnr.clone()))
            .emit();

        grants
    }

    fn signing_service(&self) -> &AltinnTjeneste {
        &self.config.signing_service
    }
}
