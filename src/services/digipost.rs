//! Digipost direct signature jobs
//!
//! A job carries the agreement PDF, the signer and three exit URLs. Digipost
//! sends the user back to one of them with a `status_query_token`, which is
//! then used to poll the job status. Completed jobs expose the signed PAdES
//! document and a confirmation URL.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{AvtaleError, DigipostJobbData, Result};

/// Where Digipost sends the user after signing, rejecting or failing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitUrls {
    #[serde(rename = "completion-url")]
    pub completion: String,
    #[serde(rename = "rejection-url")]
    pub rejection: String,
    #[serde(rename = "error-url")]
    pub error: String,
}

impl ExitUrls {
    /// Append `orgnr` to each base URL so the callback can be routed back
    pub fn for_orgnr(completion: &str, rejection: &str, error: &str, orgnr: &str) -> Self {
        let with_orgnr = |base: &str| {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{base}{sep}orgnr={}", urlencoding::encode(orgnr))
        };
        Self {
            completion: with_orgnr(completion),
            rejection: with_orgnr(rejection),
            error: with_orgnr(error),
        }
    }
}

/// A job to submit
#[derive(Debug, Clone)]
pub struct SigningJobRequest {
    /// Our own reference, shows up in Digipost's sender UI
    pub reference: String,
    pub title: String,
    pub signer_fnr: String,
    pub document: Bytes,
    pub exit_urls: ExitUrls,
}

/// Digipost's answer to a submitted job
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSigningJob {
    pub reference: String,
    /// Where the user signs
    pub redirect_url: String,
    pub status_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    InProgress,
    Completed {
        pades_url: String,
        confirmation_url: Option<String>,
    },
    /// Rejected, expired or failed
    Failed { status: String },
}

#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn create_job(&self, request: &SigningJobRequest) -> Result<CreatedSigningJob>;

    /// Poll the job; `job.status_query_token` must be set
    async fn job_status(&self, job: &DigipostJobbData) -> Result<JobStatus>;

    async fn download_signed(&self, pades_url: &str) -> Result<Bytes>;

    async fn confirm(&self, confirmation_url: &str) -> Result<()>;
}

/// Digipost client configuration
#[derive(Debug, Clone)]
pub struct DigipostConfig {
    pub base_url: String,
    /// Sender organization number
    pub sender_id: String,
    /// PEM certificate chain followed by the private key, for mutual TLS
    pub client_identity_pem: Option<Vec<u8>>,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct SignerPayload<'a> {
    #[serde(rename = "personal-identification-number")]
    personal_identification_number: &'a str,
}

#[derive(Serialize)]
struct DocumentPayload<'a> {
    title: &'a str,
    #[serde(rename = "mime-type")]
    mime_type: &'static str,
    content: String,
}

#[derive(Serialize)]
struct CreateJobPayload<'a> {
    reference: &'a str,
    signers: Vec<SignerPayload<'a>>,
    document: DocumentPayload<'a>,
    #[serde(rename = "exit-urls")]
    exit_urls: &'a ExitUrls,
    #[serde(rename = "status-retrieval-method")]
    status_retrieval_method: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobId {
    Number(i64),
    Text(String),
}

impl JobId {
    fn into_reference(self) -> String {
        match self {
            JobId::Number(n) => n.to_string(),
            JobId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    #[serde(rename = "signature-job-id")]
    signature_job_id: JobId,
    #[serde(rename = "redirect-url")]
    redirect_url: String,
    #[serde(rename = "status-url")]
    status_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(rename = "pades-url", default)]
    pades_url: Option<String>,
    #[serde(rename = "confirmation-url", default)]
    confirmation_url: Option<String>,
}

pub struct DigipostClient {
    config: DigipostConfig,
    http_client: reqwest::Client,
}

impl DigipostClient {
    pub fn new(config: DigipostConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(pem) = &config.client_identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| AvtaleError::Config(format!("Digipost client certificate: {e}")))?;
            builder = builder.identity(identity);
        }
        let http_client = builder
            .build()
            .map_err(|e| AvtaleError::Config(format!("Digipost client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn provider_error(context: &str, e: impl std::fmt::Display) -> AvtaleError {
        AvtaleError::SignatureProvider(format!("{context}: {e}"))
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AvtaleError::SignatureProvider(format!(
            "{context}: Digipost returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl SignatureProvider for DigipostClient {
    async fn create_job(&self, request: &SigningJobRequest) -> Result<CreatedSigningJob> {
        let url = format!(
            "{}/{}/direct/signature-jobs",
            self.config.base_url.trim_end_matches('/'),
            self.config.sender_id
        );

        let payload = CreateJobPayload {
            reference: &request.reference,
            signers: vec![SignerPayload {
                personal_identification_number: &request.signer_fnr,
            }],
            document: DocumentPayload {
                title: &request.title,
                mime_type: "application/pdf",
                content: base64::engine::general_purpose::STANDARD.encode(&request.document),
            },
            exit_urls: &request.exit_urls,
            status_retrieval_method: "WAIT_FOR_CALLBACK",
        };

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::provider_error("create job", e))?;
        let response = Self::check(response, "create job").await?;

        let created: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error("create job response", e))?;

        let job = CreatedSigningJob {
            reference: created.signature_job_id.into_reference(),
            redirect_url: created.redirect_url,
            status_url: created.status_url,
        };
        info!(job_reference = %job.reference, "Created signature job");
        Ok(job)
    }

    async fn job_status(&self, job: &DigipostJobbData) -> Result<JobStatus> {
        let token = job.status_query_token.as_deref().ok_or_else(|| {
            AvtaleError::BadRequest(format!("missing status query token for {}", job.orgnr))
        })?;

        let response = self
            .http_client
            .get(&job.status_url)
            .query(&[("status_query_token", token)])
            .send()
            .await
            .map_err(|e| Self::provider_error("job status", e))?;
        let response = Self::check(response, "job status").await?;

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error("job status response", e))?;
        debug!(job_reference = %job.direct_job_reference, status = %body.status, "Polled signature job");

        Ok(match body.status.as_str() {
            "COMPLETED_SUCCESSFULLY" => match body.pades_url {
                Some(pades_url) => JobStatus::Completed {
                    pades_url,
                    confirmation_url: body.confirmation_url,
                },
                None => {
                    return Err(AvtaleError::SignatureProvider(format!(
                        "job {} completed without a document",
                        job.direct_job_reference
                    )))
                }
            },
            "IN_PROGRESS" => JobStatus::InProgress,
            other => JobStatus::Failed {
                status: other.to_string(),
            },
        })
    }

    async fn download_signed(&self, pades_url: &str) -> Result<Bytes> {
        let response = self
            .http_client
            .get(pades_url)
            .send()
            .await
            .map_err(|e| Self::provider_error("download", e))?;
        let response = Self::check(response, "download").await?;

        response
            .bytes()
            .await
            .map_err(|e| Self::provider_error("download body", e))
    }

    async fn confirm(&self, confirmation_url: &str) -> Result<()> {
        let response = self
            .http_client
            .post(confirmation_url)
            .send()
            .await
            .map_err(|e| Self::provider_error("confirm", e))?;
        Self::check(response, "confirm").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_urls_carry_orgnr() {
        let urls = ExitUrls::for_orgnr(
            "https://nav.no/avtaler/signert",
            "https://nav.no/avtaler/avbrutt?kilde=digipost",
            "https://nav.no/avtaler/feil",
            "456313701",
        );
        assert_eq!(urls.completion, "https://nav.no/avtaler/signert?orgnr=456313701");
        assert_eq!(
            urls.rejection,
            "https://nav.no/avtaler/avbrutt?kilde=digipost&orgnr=456313701"
        );
        assert!(urls.error.ends_with("?orgnr=456313701"));
    }

    #[test]
    fn test_numeric_job_id_becomes_reference() {
        let json = r#"{"signature-job-id":1234,"redirect-url":"r","status-url":"s"}"#;
        let parsed: CreateJobResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.signature_job_id.into_reference(), "1234");
    }
}
