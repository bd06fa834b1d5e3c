//! Services layer for avtaler
//!
//! Clients for the external systems, each behind a trait so the
//! orchestrator can run against fakes:
//!
//! - **Altinn**: which organizations a user may sign for
//! - **Enhetsregisteret**: organization names and legal forms
//! - **Digipost**: signature jobs
//! - **PDL**: the signer's name
//! - **Bucket**: archived agreements and the agreement template
//! - **AvtaleService**: the agreement lifecycle on top of all of them

pub mod altinn;
pub mod avtale_service;
pub mod avtalemal;
pub mod bucket;
pub mod digipost;
pub mod enhetsregisteret;
pub mod pdl;

pub use altinn::{AltinnClient, AltinnConfig, AltinnTjeneste, EntitlementResolver};
pub use avtale_service::{
    archive_name, slug, AvtaleService, AvtaleServiceConfig, AvtaleServiceDeps,
};
pub use avtalemal::{AvtaleDokument, BucketDocumentSource, DocumentSource, GJELDENDE_AVTALEMAL};
pub use bucket::{
    ArchivalSink, BucketConfig, GcsBucketClient, InMemoryBucket, ObjectMetadata, StorageAuth,
    StoredObject, DEFAULT_METADATA_TOKEN_URL,
};
pub use digipost::{
    CreatedSigningJob, DigipostClient, DigipostConfig, ExitUrls, JobStatus, SignatureProvider,
    SigningJobRequest,
};
pub use enhetsregisteret::{EregClient, EregConfig, OrganizationRegistry};
pub use pdl::{PdlClient, PdlConfig, PersonRegistry};
