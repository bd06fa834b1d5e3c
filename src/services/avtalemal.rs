//! The agreement template users sign
//!
//! The current template is `avtalemal/gjeldende.pdf` in the bucket, with its
//! version in the `versjon` object metadata. Publishing a new version writes
//! both the current object and a versioned copy.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

use super::bucket::{ArchivalSink, ObjectMetadata};
use crate::types::{AvtaleError, Result};

pub const GJELDENDE_AVTALEMAL: &str = "avtalemal/gjeldende.pdf";
const VERSJON_METADATA_KEY: &str = "versjon";

/// The agreement document as presented for signing
#[derive(Debug, Clone, PartialEq)]
pub struct AvtaleDokument {
    pub bytes: Bytes,
    pub versjon: Option<String>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// The template currently presented for signing
    async fn current(&self) -> Result<AvtaleDokument>;

    /// Make `bytes` the current template
    async fn publish(&self, bytes: Bytes, versjon: &str) -> Result<()>;
}

pub struct BucketDocumentSource {
    bucket: Arc<dyn ArchivalSink>,
}

impl BucketDocumentSource {
    pub fn new(bucket: Arc<dyn ArchivalSink>) -> Self {
        Self { bucket }
    }
}

fn versioned_name(versjon: &str) -> Result<String> {
    let valid = !versjon.is_empty()
        && versjon
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid {
        return Err(AvtaleError::BadRequest(format!("invalid template version '{versjon}'")));
    }
    Ok(format!("avtalemal/{versjon}.pdf"))
}

#[async_trait]
impl DocumentSource for BucketDocumentSource {
    async fn current(&self) -> Result<AvtaleDokument> {
        let object = self
            .bucket
            .get_object(GJELDENDE_AVTALEMAL)
            .await?
            .ok_or_else(|| AvtaleError::Config(format!("no agreement template at {GJELDENDE_AVTALEMAL}")))?;

        Ok(AvtaleDokument {
            versjon: object.metadata.get(VERSJON_METADATA_KEY).cloned(),
            bytes: object.bytes,
        })
    }

    async fn publish(&self, bytes: Bytes, versjon: &str) -> Result<()> {
        let versioned = versioned_name(versjon)?;
        let mut metadata = ObjectMetadata::new();
        metadata.insert(VERSJON_METADATA_KEY.to_string(), versjon.to_string());

        self.bucket
            .put_object(&versioned, bytes.clone(), "application/pdf", &metadata)
            .await?;
        self.bucket
            .put_object(GJELDENDE_AVTALEMAL, bytes, "application/pdf", &metadata)
            .await?;

        info!(versjon = %versjon, "Published agreement template");
        Ok(())
    }
}
