//! MongoDB client and collection wrapper

use bson::{doc, DateTime, Document};
use mongodb::{options::IndexOptions, results::UpdateResult, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::types::AvtaleError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas written by natural key
pub trait UpsertFields {
    /// Filter selecting the one document this value replaces
    fn key(&self) -> Document;

    /// Fields written on every upsert
    fn fields(&self) -> Document;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, AvtaleError> {
        info!("Connecting to MongoDB database '{}'", db_name);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| AvtaleError::Store(format!("Failed to connect to MongoDB: {}", e)))?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    pub async fn ping(&self) -> Result<(), AvtaleError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AvtaleError::Store(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, AvtaleError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + UpsertFields,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + UpsertFields,
{
    /// Open a collection and apply its indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, AvtaleError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), AvtaleError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| AvtaleError::Store(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, AvtaleError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| AvtaleError::Store(format!("Find failed: {}", e)))
    }

    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, AvtaleError> {
        use futures_util::TryStreamExt;

        let cursor = self
            .inner
            .find(filter)
            .await
            .map_err(|e| AvtaleError::Store(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .try_collect()
            .await
            .map_err(|e| AvtaleError::Store(format!("Error reading document: {}", e)))?;

        Ok(results)
    }

    /// Replace the fields of the document matching `item.key()`, inserting
    /// it when absent. Atomic for the single document.
    pub async fn upsert_one(&self, item: &T) -> Result<UpdateResult, AvtaleError> {
        let now = DateTime::now();
        let mut set = item.fields();
        set.insert("metadata.updated_at", now);

        let update = doc! {
            "$set": set,
            "$setOnInsert": { "metadata.created_at": now },
        };

        let result = self
            .inner
            .update_one(item.key(), update)
            .upsert(true)
            .await
            .map_err(|e| AvtaleError::Store(format!("Upsert failed: {}", e)))?;

        if result.matched_count == 0 && result.upserted_id.is_none() {
            return Err(AvtaleError::Store(format!(
                "Upsert touched no document for {}",
                item.key()
            )));
        }

        Ok(result)
    }
}
