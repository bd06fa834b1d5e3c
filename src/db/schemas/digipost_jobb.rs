//! Pending signing job schema

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, UpsertFields};
use crate::db::schemas::Metadata;
use crate::types::DigipostJobbData;

/// Collection name for pending signing jobs
pub const DIGIPOST_JOBB_COLLECTION: &str = "digipost_jobb_data";

/// The latest submitted signing job for one organization.
///
/// The status query token is never persisted; it arrives with the callback.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DigipostJobbDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub orgnr: String,

    #[serde(default)]
    pub navn: String,

    pub direct_job_reference: String,

    pub status_url: String,

    #[serde(default)]
    pub navn_innsender: String,

    #[serde(default)]
    pub avtaleversjon: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub opprettet: DateTime<Utc>,
}

impl From<&DigipostJobbData> for DigipostJobbDoc {
    fn from(job: &DigipostJobbData) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            orgnr: job.orgnr.clone(),
            navn: job.navn.clone(),
            direct_job_reference: job.direct_job_reference.clone(),
            status_url: job.status_url.clone(),
            navn_innsender: job.navn_innsender.clone(),
            avtaleversjon: job.avtaleversjon.clone(),
            opprettet: job.opprettet,
        }
    }
}

impl From<DigipostJobbDoc> for DigipostJobbData {
    fn from(doc: DigipostJobbDoc) -> Self {
        DigipostJobbData {
            orgnr: doc.orgnr,
            navn: doc.navn,
            direct_job_reference: doc.direct_job_reference,
            status_url: doc.status_url,
            status_query_token: None,
            navn_innsender: doc.navn_innsender,
            avtaleversjon: doc.avtaleversjon,
            opprettet: doc.opprettet,
        }
    }
}

impl UpsertFields for DigipostJobbDoc {
    fn key(&self) -> Document {
        doc! { "orgnr": &self.orgnr }
    }

    fn fields(&self) -> Document {
        doc! {
            "orgnr": &self.orgnr,
            "navn": &self.navn,
            "direct_job_reference": &self.direct_job_reference,
            "status_url": &self.status_url,
            "navn_innsender": &self.navn_innsender,
            "avtaleversjon": self.avtaleversjon.clone(),
            "opprettet": bson::DateTime::from_chrono(self.opprettet),
        }
    }
}

impl IntoIndexes for DigipostJobbDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "orgnr": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("digipost_jobb_orgnr_unique".to_string())
                    .build(),
            ),
        )]
    }
}

