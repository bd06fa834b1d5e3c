//! Agreement lifecycle
//!
//! Per organization: `NONE -> PENDING -> SIGNED`.
//!
//! `create_agreement` checks the signing right, looks the organization up,
//! submits a signing job and records it as pending. `reconcile_completion`
//! polls that job with the token from Digipost's callback and, once signed,
//! writes the agreement, archives the signed PDF and confirms the job.
//!
//! Steps run strictly in order and stop at the first failure. The two steps
//! after the agreement write are best-effort: a failed archive upload or job
//! confirmation is logged and never undoes the write.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::altinn::EntitlementResolver;
use super::avtalemal::DocumentSource;
use super::bucket::{ArchivalSink, ObjectMetadata, StoredObject};
use super::digipost::{ExitUrls, JobStatus, SignatureProvider, SigningJobRequest};
use super::enhetsregisteret::OrganizationRegistry;
use super::pdl::PersonRegistry;
use crate::auth::Innlogget;
use crate::db::AgreementStore;
use crate::logging::{AuditEvent, AuditEventType};
use crate::types::{
    AvtaleError, Avtale, DigipostJobbData, Kommune, KommuneAvtale, Lookup, Result,
};

const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Callback URLs and labels for submitted jobs
#[derive(Debug, Clone)]
pub struct AvtaleServiceConfig {
    pub completion_url: String,
    pub rejection_url: String,
    pub error_url: String,
    /// Document title shown in Digipost
    pub document_title: String,
}

/// The collaborators the orchestrator drives
#[derive(Clone)]
pub struct AvtaleServiceDeps {
    pub entitlements: Arc<dyn EntitlementResolver>,
    pub registry: Arc<dyn OrganizationRegistry>,
    pub signing: Arc<dyn SignatureProvider>,
    pub persons: Arc<dyn PersonRegistry>,
    pub documents: Arc<dyn DocumentSource>,
    pub archive: Arc<dyn ArchivalSink>,
    pub store: Arc<dyn AgreementStore>,
}

pub struct AvtaleService {
    deps: AvtaleServiceDeps,
    config: AvtaleServiceConfig,
}

/// Lowercase, æ/ø/å folded to ASCII, everything else non-alphanumeric
/// collapsed to single dashes.
pub fn slug(navn: &str) -> String {
    let mut out = String::with_capacity(navn.len());
    for c in navn.to_lowercase().chars() {
        match c {
            'æ' => out.push_str("ae"),
            'ø' => out.push('o'),
            'å' => out.push('a'),
            c if c.is_ascii_alphanumeric() => out.push(c),
            _ => {
                if !out.is_empty() && !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn archive_prefix(orgnr: &str) -> String {
    format!("avtaler/{orgnr}/")
}

fn archive_suffix(job_opprettet: DateTime<Utc>) -> String {
    format!("-{}.pdf", job_opprettet.format(ARCHIVE_TIMESTAMP_FORMAT))
}

/// `avtaler/<orgnr>/<slug(navn)>-<job created>.pdf`. The same pending job
/// always maps to the same name, so a re-run overwrites its own upload.
pub fn archive_name(orgnr: &str, navn: &str, job_opprettet: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        archive_prefix(orgnr),
        slug(navn),
        archive_suffix(job_opprettet)
    )
}

impl AvtaleService {
    pub fn new(deps: AvtaleServiceDeps, config: AvtaleServiceConfig) -> Self {
        Self { deps, config }
    }

    pub fn store(&self) -> &Arc<dyn AgreementStore> {
        &self.deps.store
    }

    pub fn documents(&self) -> &Arc<dyn DocumentSource> {
        &self.deps.documents
    }

    /// Fail with `Forbidden` unless the user may sign for `orgnr`
    pub async fn require_signing_right(&self, innlogget: &Innlogget, orgnr: &str) -> Result<()> {
        if self.deps.entitlements.has_signing_right(innlogget, orgnr).await {
            Ok(())
        } else {
            Err(AvtaleError::Forbidden(format!(
                "no signing right for organization {orgnr}"
            )))
        }
    }

    /// Every municipality the user may sign for, with its current agreement
    pub async fn kommuner(&self, innlogget: &Innlogget) -> Result<Vec<KommuneAvtale>> {
        let avgivere = self.deps.entitlements.signable_kommuner(innlogget).await;
        let orgnrs: Vec<String> = avgivere.iter().map(|a| a.orgnr.clone()).collect();
        let avtaler = self.deps.store.get_agreements_for_orgs(&orgnrs).await?;

        Ok(avgivere
            .iter()
            .map(|avgiver| KommuneAvtale::new(avgiver, avtaler.get(&avgiver.orgnr)))
            .collect())
    }

    /// One municipality the user may sign for
    pub async fn kommune(&self, innlogget: &Innlogget, orgnr: &str) -> Result<KommuneAvtale> {
        let avgiver = self
            .deps
            .entitlements
            .signable_kommuner(innlogget)
            .await
            .into_iter()
            .find(|a| a.orgnr == orgnr)
            .ok_or_else(|| {
                AvtaleError::Forbidden(format!("no signing right for organization {orgnr}"))
            })?;

        let avtaler = self
            .deps
            .store
            .get_agreements_for_orgs(&[orgnr.to_string()])
            .await?;
        Ok(KommuneAvtale::new(&avgiver, avtaler.get(orgnr)))
    }

    /// Submit a signing job for `orgnr` and return where the user signs.
    pub async fn create_agreement(&self, innlogget: &Innlogget, orgnr: &str) -> Result<String> {
        self.require_signing_right(innlogget, orgnr).await?;

        let kommune = match self.deps.registry.resolve_organization(orgnr).await? {
            Lookup::Found(kommune) => kommune,
            Lookup::NotFound => return Err(AvtaleError::OrganizationUnknown(orgnr.to_string())),
        };
        if !kommune.is_kommune() {
            return Err(AvtaleError::Forbidden(format!(
                "organization {orgnr} is not a municipality"
            )));
        }

        let navn_innsender = self.deps.persons.full_name(innlogget).await?;
        let dokument = self.deps.documents.current().await?;

        let request = SigningJobRequest {
            reference: format!("avtale-{orgnr}-{}", Uuid::new_v4().simple()),
            title: self.config.document_title.clone(),
            signer_fnr: innlogget.fnr.clone(),
            document: dokument.bytes,
            exit_urls: ExitUrls::for_orgnr(
                &self.config.completion_url,
                &self.config.rejection_url,
                &self.config.error_url,
                orgnr,
            ),
        };

        let created = self.deps.signing.create_job(&request).await?;

        let job = DigipostJobbData {
            orgnr: orgnr.to_string(),
            navn: kommune.navn,
            direct_job_reference: created.reference,
            status_url: created.status_url,
            status_query_token: None,
            navn_innsender,
            avtaleversjon: dokument.versjon,
            opprettet: Utc::now(),
        };
        self.deps.store.upsert_pending_job(&job).await?;

        info!(orgnr = %orgnr, job_reference = %job.direct_job_reference, "Signing job pending");
        AuditEvent::new(AuditEventType::SigningStarted)
            .with_subject(&innlogget.fnr)
            .with_orgnrs([orgnr])
            .emit();

        Ok(created.redirect_url)
    }

    /// Resolve the pending job for `orgnr`. `Ok(None)` while it is not signed.
    pub async fn reconcile_completion(
        &self,
        orgnr: &str,
        status_query_token: &str,
    ) -> Result<Option<Avtale>> {
        let mut job = self
            .deps
            .store
            .get_pending_job(orgnr)
            .await?
            .ok_or_else(|| AvtaleError::NoPendingJob(orgnr.to_string()))?;
        job.status_query_token = Some(status_query_token.to_string());

        let (pades_url, confirmation_url) = match self.deps.signing.job_status(&job).await? {
            JobStatus::Completed {
                pades_url,
                confirmation_url,
            } => (pades_url, confirmation_url),
            JobStatus::InProgress => return Ok(None),
            JobStatus::Failed { status } => {
                warn!(
                    orgnr = %orgnr,
                    job_reference = %job.direct_job_reference,
                    status = %status,
                    "Signing job did not complete, organization stays pending"
                );
                return Ok(None);
            }
        };

        let signert = self.deps.signing.download_signed(&pades_url).await?;
        let signert_tidspunkt = Utc::now();

        let avtale = Avtale {
            id: Uuid::new_v4(),
            orgnr: job.orgnr.clone(),
            navn: job.navn.clone(),
            navn_innsender: job.navn_innsender.clone(),
            avtaleversjon: job.avtaleversjon.clone(),
            er_signert: true,
            opprettet: job.opprettet,
        };
        self.deps.store.upsert_agreement(&avtale).await?;
        info!(orgnr = %orgnr, job_reference = %job.direct_job_reference, "Agreement signed");

        if let Err(e) = self.archive(&job, signert, signert_tidspunkt).await {
            error!(
                orgnr = %orgnr,
                job_reference = %job.direct_job_reference,
                error = %e,
                "Archiving signed agreement failed, needs manual upload"
            );
        }

        if let Some(url) = confirmation_url {
            if let Err(e) = self.deps.signing.confirm(&url).await {
                warn!(orgnr = %orgnr, error = %e, "Could not confirm signing job");
            }
        }

        AuditEvent::new(AuditEventType::SigningCompleted)
            .with_orgnrs([orgnr])
            .emit();

        Ok(Some(avtale))
    }

    /// The archived signed agreement for `orgnr`
    pub async fn signed_document(&self, innlogget: &Innlogget, orgnr: &str) -> Result<StoredObject> {
        self.require_signing_right(innlogget, orgnr).await?;

        let avtale = self
            .deps
            .store
            .get_agreements_for_orgs(&[orgnr.to_string()])
            .await?
            .remove(orgnr)
            .filter(|a| a.er_signert)
            .ok_or_else(|| AvtaleError::NotFound(format!("no signed agreement for {orgnr}")))?;

        let suffix = archive_suffix(avtale.opprettet);
        let name = self
            .deps
            .archive
            .list_objects(&archive_prefix(orgnr))
            .await?
            .into_iter()
            .rev()
            .find(|name| name.ends_with(&suffix))
            .ok_or_else(|| AvtaleError::NotFound(format!("signed agreement for {orgnr} is not archived")))?;

        let object = self
            .deps
            .archive
            .get_object(&name)
            .await?
            .ok_or_else(|| AvtaleError::NotFound(name.clone()))?;

        AuditEvent::new(AuditEventType::DocumentRead)
            .with_subject(&innlogget.fnr)
            .with_orgnrs([orgnr])
            .emit();

        Ok(object)
    }

    async fn archive(
        &self,
        job: &DigipostJobbData,
        signert: Bytes,
        signert_tidspunkt: DateTime<Utc>,
    ) -> Result<()> {
        let navn = match self.deps.registry.resolve_organization(&job.orgnr).await {
            Ok(Lookup::Found(Kommune { navn, .. })) => navn,
            Ok(Lookup::NotFound) => {
                warn!(orgnr = %job.orgnr, "Organization gone from registry, archiving under stored name");
                job.navn.clone()
            }
            Err(e) => {
                warn!(orgnr = %job.orgnr, error = %e, "Registry lookup failed, archiving under stored name");
                job.navn.clone()
            }
        };

        let name = archive_name(&job.orgnr, &navn, job.opprettet);

        let mut metadata = ObjectMetadata::new();
        metadata.insert("navn_innsender".into(), job.navn_innsender.clone());
        metadata.insert("signert_tidspunkt".into(), signert_tidspunkt.to_rfc3339());
        metadata.insert("orgnr".into(), job.orgnr.clone());
        if let Some(versjon) = &job.avtaleversjon {
            metadata.insert("avtaleversjon".into(), versjon.clone());
        }
        metadata.insert("sha256".into(), hex::encode(Sha256::digest(&signert)));

        self.deps
            .archive
            .put_object(&name, signert, "application/pdf", &metadata)
            .await
    }
}
