//! Shared fixtures for the integration tests: in-process fakes for every
//! collaborator of the agreement service and a builder that wires them up.

#![allow(dead_code)]

pub mod keys;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use avtaler::auth::{CallerTokenValidator, Innlogget, ValidatorConfig};
use avtaler::db::InMemoryAgreementStore;
use avtaler::services::{
    AltinnTjeneste, ArchivalSink, AvtaleService, AvtaleServiceConfig, AvtaleServiceDeps,
    BucketDocumentSource, CreatedSigningJob, DocumentSource, EntitlementResolver, InMemoryBucket,
    JobStatus, ObjectMetadata, OrganizationRegistry, PersonRegistry, SignatureProvider,
    SigningJobRequest, StoredObject,
};
use avtaler::types::{
    Avgiver, AvtaleError, DigipostJobbData, Kommune, Lookup, Result, KOMMUNE_ORGANISASJONSFORM,
};

pub const SIGNER_FNR: &str = "15084300133";
pub const OSLO: &str = "456313701";
pub const SIGNED_PDF: &[u8] = b"%PDF-1.7 signed by Ola Nordmann";
pub const TEMPLATE_PDF: &[u8] = b"%PDF-1.7 agreement template";

pub fn innlogget() -> Innlogget {
    Innlogget {
        fnr: SIGNER_FNR.to_string(),
        token: "caller-token".to_string(),
    }
}

pub fn kommune(orgnr: &str, navn: &str) -> Kommune {
    Kommune {
        orgnr: orgnr.to_string(),
        navn: navn.to_string(),
        organisasjonsform: KOMMUNE_ORGANISASJONSFORM.to_string(),
    }
}

pub fn avgiver(orgnr: &str, navn: &str) -> Avgiver {
    Avgiver {
        navn: navn.to_string(),
        orgnr: orgnr.to_string(),
        organisasjonsform: KOMMUNE_ORGANISASJONSFORM.to_string(),
        parent_orgnr: None,
    }
}

/// Grants held per fnr
pub struct FakeEntitlements {
    grants: Mutex<HashMap<String, Vec<Avgiver>>>,
    service: AltinnTjeneste,
}

impl FakeEntitlements {
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            service: AltinnTjeneste::new("5867", "1"),
        }
    }

    pub fn grant(&self, fnr: &str, avgiver: Avgiver) {
        self.grants
            .lock()
            .unwrap()
            .entry(fnr.to_string())
            .or_default()
            .push(avgiver);
    }
}

#[async_trait]
impl EntitlementResolver for FakeEntitlements {
    async fn list_grants_for(&self, innlogget: &Innlogget, _tjeneste: &AltinnTjeneste) -> Vec<Avgiver> {
        self.grants
            .lock()
            .unwrap()
            .get(&innlogget.fnr)
            .cloned()
            .unwrap_or_default()
    }

    fn signing_service(&self) -> &AltinnTjeneste {
        &self.service
    }
}

/// Registry with a fixed set of organizations
#[derive(Default)]
pub struct FakeRegistry {
    organizations: Mutex<HashMap<String, Kommune>>,
}

impl FakeRegistry {
    pub fn with(kommuner: impl IntoIterator<Item = Kommune>) -> Self {
        let registry = Self::default();
        for k in kommuner {
            registry.organizations.lock().unwrap().insert(k.orgnr.clone(), k);
        }
        registry
    }
}

#[async_trait]
impl OrganizationRegistry for FakeRegistry {
    async fn resolve_organization(&self, orgnr: &str) -> Result<Lookup<Kommune>> {
        Ok(match self.organizations.lock().unwrap().get(orgnr) {
            Some(k) => Lookup::Found(k.clone()),
            None => Lookup::NotFound,
        })
    }
}

/// Signature provider whose job status is set by the test
pub struct FakeSigning {
    pub status: Mutex<JobStatus>,
    pub requests: Mutex<Vec<SigningJobRequest>>,
    pub status_tokens: Mutex<Vec<String>>,
    pub downloads: AtomicUsize,
    pub confirmations: AtomicUsize,
}

impl FakeSigning {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(JobStatus::InProgress),
            requests: Mutex::new(Vec::new()),
            status_tokens: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
            confirmations: AtomicUsize::new(0),
        }
    }

    pub fn complete(&self) {
        *self.status.lock().unwrap() = JobStatus::Completed {
            pades_url: "https://signering.posten.no/pades/1".to_string(),
            confirmation_url: Some("https://signering.posten.no/confirm/1".to_string()),
        };
    }

    pub fn fail(&self, status: &str) {
        *self.status.lock().unwrap() = JobStatus::Failed {
            status: status.to_string(),
        };
    }

    pub fn created_jobs(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SignatureProvider for FakeSigning {
    async fn create_job(&self, request: &SigningJobRequest) -> Result<CreatedSigningJob> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let n = requests.len();
        Ok(CreatedSigningJob {
            reference: format!("job-{n}"),
            redirect_url: format!("https://signering.posten.no/redirect/{n}"),
            status_url: format!("https://signering.posten.no/status/{n}"),
        })
    }

    async fn job_status(&self, job: &DigipostJobbData) -> Result<JobStatus> {
        let token = job
            .status_query_token
            .clone()
            .ok_or_else(|| AvtaleError::BadRequest("no status query token".into()))?;
        self.status_tokens.lock().unwrap().push(token);
        Ok(self.status.lock().unwrap().clone())
    }

    async fn download_signed(&self, _pades_url: &str) -> Result<Bytes> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(SIGNED_PDF))
    }

    async fn confirm(&self, _confirmation_url: &str) -> Result<()> {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakePersons;

#[async_trait]
impl PersonRegistry for FakePersons {
    async fn full_name(&self, _innlogget: &Innlogget) -> Result<String> {
        Ok("Ola Nordmann".to_string())
    }
}

/// Bucket that refuses every write
pub struct FailingBucket;

#[async_trait]
impl ArchivalSink for FailingBucket {
    async fn put_object(&self, name: &str, _: Bytes, _: &str, _: &ObjectMetadata) -> Result<()> {
        Err(AvtaleError::Archive(format!("{name}: bucket unavailable")))
    }

    async fn object_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn get_object(&self, _name: &str) -> Result<Option<StoredObject>> {
        Ok(None)
    }

    async fn list_objects(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Formatted log output collected from the current thread
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's tracing output into the buffer until the guard
    /// drops. `#[tokio::test]` runs on one thread, so spawned work is
    /// captured too.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines emitted at `level` on `target`, e.g. `("INFO", "audit")`
    pub fn matching(&self, level: &str, target: &str) -> Vec<String> {
        let prefix = format!("{target}:");
        self.lines()
            .into_iter()
            .filter(|line| {
                let words: Vec<&str> = line.split_whitespace().collect();
                words.contains(&level) && words.contains(&prefix.as_str())
            })
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Every fake, kept so tests can inspect them after driving the service
pub struct Harness {
    pub service: Arc<AvtaleService>,
    pub entitlements: Arc<FakeEntitlements>,
    pub signing: Arc<FakeSigning>,
    pub store: Arc<InMemoryAgreementStore>,
    pub archive: Arc<InMemoryBucket>,
    pub templates: Arc<InMemoryBucket>,
}

pub fn service_config() -> AvtaleServiceConfig {
    AvtaleServiceConfig {
        completion_url: "https://nav.no/avtaler/signert".into(),
        rejection_url: "https://nav.no/avtaler/avbrutt".into(),
        error_url: "https://nav.no/avtaler/feil".into(),
        document_title: "Samarbeidsavtale".into(),
    }
}

pub async fn harness() -> Harness {
    harness_with_archive(None).await
}

/// Build the service; `archive` replaces the in-memory archive bucket
pub async fn harness_with_archive(archive: Option<Arc<dyn ArchivalSink>>) -> Harness {
    let entitlements = Arc::new(FakeEntitlements::new());
    let signing = Arc::new(FakeSigning::new());
    let store = Arc::new(InMemoryAgreementStore::new());
    let archive_bucket = Arc::new(InMemoryBucket::new());
    let templates = Arc::new(InMemoryBucket::new());

    let documents = BucketDocumentSource::new(templates.clone());
    documents
        .publish(Bytes::from_static(TEMPLATE_PDF), "2")
        .await
        .unwrap();

    let deps = AvtaleServiceDeps {
        entitlements: entitlements.clone(),
        registry: Arc::new(FakeRegistry::with([
            kommune(OSLO, "Oslo kommune"),
            kommune("964338531", "Bø i Telemark kommune"),
            Kommune {
                orgnr: "974760673".into(),
                navn: "Brønnøysundregistrene".into(),
                organisasjonsform: "ORGL".into(),
            },
        ])),
        signing: signing.clone(),
        persons: Arc::new(FakePersons),
        documents: Arc::new(documents),
        archive: archive.unwrap_or_else(|| archive_bucket.clone() as Arc<dyn ArchivalSink>),
        store: store.clone(),
    };

    Harness {
        service: Arc::new(AvtaleService::new(deps, service_config())),
        entitlements,
        signing,
        store,
        archive: archive_bucket,
        templates,
    }
}

/// Validator that skips signature checks, for route tests
pub fn dev_validator() -> Arc<CallerTokenValidator> {
    Arc::new(CallerTokenValidator::new(
        ValidatorConfig {
            jwks_url: "http://127.0.0.1:9/jwks".into(),
            issuer: "tokenx".into(),
            audience: "avtaler".into(),
            dev_mode: true,
        },
        reqwest::Client::new(),
    ))
}

/// An RS256 caller token signed with the test key
pub fn caller_token(claims: serde_json::Value) -> String {
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(keys::TEST_KEY_ID.to_string());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(keys::TEST_PRIVATE_KEY.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, &claims, &key).unwrap()
}
