//! Agreement store
//!
//! All writes are upserts keyed by organization number, so re-running a
//! reconciliation leaves exactly one record per organization.

use async_trait::async_trait;
use bson::doc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::{AvtaleDoc, DigipostJobbDoc, AVTALE_COLLECTION, DIGIPOST_JOBB_COLLECTION};
use crate::types::{Avtale, DigipostJobbData, Result};

#[async_trait]
pub trait AgreementStore: Send + Sync {
    async fn upsert_agreement(&self, avtale: &Avtale) -> Result<()>;

    async fn upsert_pending_job(&self, job: &DigipostJobbData) -> Result<()>;

    async fn get_pending_job(&self, orgnr: &str) -> Result<Option<DigipostJobbData>>;

    /// Current agreements for the given organizations, keyed by orgnr.
    /// Organizations without an agreement are absent from the map.
    async fn get_agreements_for_orgs(&self, orgnrs: &[String]) -> Result<HashMap<String, Avtale>>;

    /// Whether the backing database answers
    async fn ping(&self) -> Result<()>;
}

/// Store backed by MongoDB
pub struct MongoAgreementStore {
    client: MongoClient,
    avtaler: MongoCollection<AvtaleDoc>,
    jobber: MongoCollection<DigipostJobbDoc>,
}

impl MongoAgreementStore {
    pub async fn new(client: MongoClient) -> Result<Self> {
        let avtaler = client.collection::<AvtaleDoc>(AVTALE_COLLECTION).await?;
        let jobber = client
            .collection::<DigipostJobbDoc>(DIGIPOST_JOBB_COLLECTION)
            .await?;
        Ok(Self {
            client,
            avtaler,
            jobber,
        })
    }
}

#[async_trait]
impl AgreementStore for MongoAgreementStore {
    async fn upsert_agreement(&self, avtale: &Avtale) -> Result<()> {
        let result = self.avtaler.upsert_one(&AvtaleDoc::from(avtale)).await?;
        debug!(
            orgnr = %avtale.orgnr,
            matched = result.matched_count,
            inserted = result.upserted_id.is_some(),
            "Upserted agreement"
        );
        Ok(())
    }

    async fn upsert_pending_job(&self, job: &DigipostJobbData) -> Result<()> {
        self.jobber.upsert_one(&DigipostJobbDoc::from(job)).await?;
        debug!(orgnr = %job.orgnr, job_reference = %job.direct_job_reference, "Upserted pending job");
        Ok(())
    }

    async fn get_pending_job(&self, orgnr: &str) -> Result<Option<DigipostJobbData>> {
        Ok(self
            .jobber
            .find_one(doc! { "orgnr": orgnr })
            .await?
            .map(DigipostJobbData::from))
    }

    async fn get_agreements_for_orgs(&self, orgnrs: &[String]) -> Result<HashMap<String, Avtale>> {
        if orgnrs.is_empty() {
            return Ok(HashMap::new());
        }

        let docs = self
            .avtaler
            .find_many(doc! { "orgnr": { "$in": orgnrs.to_vec() } })
            .await?;

        docs.into_iter()
            .map(|doc| Avtale::try_from(doc).map(|avtale| (avtale.orgnr.clone(), avtale)))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}

/// Store kept in memory, for tests and local runs
#[derive(Default)]
pub struct InMemoryAgreementStore {
    avtaler: RwLock<HashMap<String, Avtale>>,
    jobber: RwLock<HashMap<String, DigipostJobbData>>,
}

impl InMemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn agreement_count(&self) -> usize {
        self.avtaler.read().await.len()
    }
}

#[async_trait]
impl AgreementStore for InMemoryAgreementStore {
    async fn upsert_agreement(&self, avtale: &Avtale) -> Result<()> {
        self.avtaler
            .write()
            .await
            .insert(avtale.orgnr.clone(), avtale.clone());
        Ok(())
    }

    async fn upsert_pending_job(&self, job: &DigipostJobbData) -> Result<()> {
        // The status query token is never persisted
        let stored = DigipostJobbData {
            status_query_token: None,
            ..job.clone()
        };
        self.jobber.write().await.insert(job.orgnr.clone(), stored);
        Ok(())
    }

    async fn get_pending_job(&self, orgnr: &str) -> Result<Option<DigipostJobbData>> {
        Ok(self.jobber.read().await.get(orgnr).cloned())
    }

    async fn get_agreements_for_orgs(&self, orgnrs: &[String]) -> Result<HashMap<String, Avtale>> {
        let avtaler = self.avtaler.read().await;
        Ok(orgnrs
            .iter()
            .filter_map(|orgnr| avtaler.get(orgnr).map(|a| (orgnr.clone(), a.clone())))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn avtale(orgnr: &str, navn_innsender: &str) -> Avtale {
        Avtale {
            id: Uuid::new_v4(),
            orgnr: orgnr.into(),
            navn: "Oslo kommune".into(),
            navn_innsender: navn_innsender.into(),
            avtaleversjon: Some("1.0".into()),
            er_signert: true,
            opprettet: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = InMemoryAgreementStore::new();
        let written = avtale("456313701", "Ola Nordmann");
        store.upsert_agreement(&written).await.unwrap();

        let read = store
            .get_agreements_for_orgs(&["456313701".to_string(), "999999999".to_string()])
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read.get("456313701"), Some(&written));
    }

    #[tokio::test]
    async fn test_latest_upsert_wins() {
        let store = InMemoryAgreementStore::new();
        store.upsert_agreement(&avtale("456313701", "Ola")).await.unwrap();
        store.upsert_agreement(&avtale("456313701", "Kari")).await.unwrap();

        assert_eq!(store.agreement_count().await, 1);
        let read = store
            .get_agreements_for_orgs(&["456313701".to_string()])
            .await
            .unwrap();
        assert_eq!(read["456313701"].navn_innsender, "Kari");
    }

    #[tokio::test]
    async fn test_pending_job_drops_status_query_token() {
        let store = InMemoryAgreementStore::new();
        let job = DigipostJobbData {
            orgnr: "456313701".into(),
            navn: "Oslo kommune".into(),
            direct_job_reference: "42".into(),
            status_url: "https://digipost.test/status/42".into(),
            status_query_token: Some("secret".into()),
            navn_innsender: "Ola".into(),
            avtaleversjon: None,
            opprettet: Utc::now(),
        };
        store.upsert_pending_job(&job).await.unwrap();

        let read = store.get_pending_job("456313701").await.unwrap().unwrap();
        assert_eq!(read.status_query_token, None);
        assert_eq!(read.direct_job_reference, "42");
        assert!(store.get_pending_job("999999999").await.unwrap().is_none());
    }
}
