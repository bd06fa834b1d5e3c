//! Agreement document schema

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, UpsertFields};
use crate::db::schemas::Metadata;
use crate::types::{Avtale, AvtaleError};

/// Collection name for agreements
pub const AVTALE_COLLECTION: &str = "avtale";

/// Current agreement for one organization
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AvtaleDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Agreement id (UUID string)
    pub avtale_id: String,

    pub orgnr: String,

    pub navn: String,

    pub navn_innsender: String,

    #[serde(default)]
    pub avtaleversjon: Option<String>,

    pub er_signert: bool,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub opprettet: DateTime<Utc>,
}

impl From<&Avtale> for AvtaleDoc {
    fn from(avtale: &Avtale) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            avtale_id: avtale.id.to_string(),
            orgnr: avtale.orgnr.clone(),
            navn: avtale.navn.clone(),
            navn_innsender: avtale.navn_innsender.clone(),
            avtaleversjon: avtale.avtaleversjon.clone(),
            er_signert: avtale.er_signert,
            opprettet: avtale.opprettet,
        }
    }
}

impl TryFrom<AvtaleDoc> for Avtale {
    type Error = AvtaleError;

    fn try_from(doc: AvtaleDoc) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&doc.avtale_id)
            .map_err(|e| AvtaleError::Store(format!("bad avtale_id for {}: {e}", doc.orgnr)))?;
        Ok(Avtale {
            id,
            orgnr: doc.orgnr,
            navn: doc.navn,
            navn_innsender: doc.navn_innsender,
            avtaleversjon: doc.avtaleversjon,
            er_signert: doc.er_signert,
            opprettet: doc.opprettet,
        })
    }
}

impl UpsertFields for AvtaleDoc {
    fn key(&self) -> Document {
        doc! { "orgnr": &self.orgnr }
    }

    fn fields(&self) -> Document {
        doc! {
            "avtale_id": &self.avtale_id,
            "orgnr": &self.orgnr,
            "navn": &self.navn,
            "navn_innsender": &self.navn_innsender,
            "avtaleversjon": self.avtaleversjon.clone(),
            "er_signert": self.er_signert,
            "opprettet": bson::DateTime::from_chrono(self.opprettet),
        }
    }
}

impl IntoIndexes for AvtaleDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "orgnr": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("avtale_orgnr_unique".to_string())
                    .build(),
            ),
        )]
    }
}
