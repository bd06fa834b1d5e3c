//! Object storage in a Google Cloud Storage bucket
//!
//! Signed agreements are archived here, and the current agreement template
//! is read from here. Uses the GCS JSON API directly:
//! - upload: `POST /upload/storage/v1/b/{bucket}/o?uploadType=multipart`
//! - metadata: `GET /storage/v1/b/{bucket}/o/{name}`
//! - content: `GET /storage/v1/b/{bucket}/o/{name}?alt=media`
//! - listing: `GET /storage/v1/b/{bucket}/o?prefix=...`
//!
//! Uploads overwrite objects of the same name.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{AccessToken, EXPIRY_MARGIN_SECS};
use crate::types::{AvtaleError, Result};

/// Object metadata as stored in the bucket
pub type ObjectMetadata = BTreeMap<String, String>;

/// A downloaded object
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub name: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

#[async_trait]
pub trait ArchivalSink: Send + Sync {
    async fn put_object(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()>;

    async fn object_exists(&self, name: &str) -> Result<bool>;

    async fn get_object(&self, name: &str) -> Result<Option<StoredObject>>;

    /// Names of all objects under `prefix`, sorted
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

/// How requests to the bucket are authorized
#[derive(Debug, Clone)]
pub enum StorageAuth {
    /// Token from the GCE metadata server (workload identity)
    MetadataServer { token_url: String },
    /// No authorization, for the local emulator
    None,
}

pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// `https://storage.googleapis.com`, or the emulator
    pub base_url: String,
    pub bucket: String,
    pub auth: StorageAuth,
}

#[derive(Debug, Deserialize)]
struct MetadataServerToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct GcsBucketClient {
    config: BucketConfig,
    http_client: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl GcsBucketClient {
    pub fn new(config: BucketConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
            token: Mutex::new(None),
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base(),
            self.config.bucket,
            urlencoding::encode(name)
        )
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token_url = match &self.config.auth {
            StorageAuth::None => return Ok(request),
            StorageAuth::MetadataServer { token_url } => token_url,
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(EXPIRY_MARGIN_SECS, Utc::now()) {
                return Ok(request.bearer_auth(&token.token));
            }
        }

        let response = self
            .http_client
            .get(token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("metadata server: {e}")))?;
        if !response.status().is_success() {
            return Err(AvtaleError::Upstream(format!(
                "metadata server returned {}",
                response.status()
            )));
        }
        let body: MetadataServerToken = response
            .json()
            .await
            .map_err(|e| AvtaleError::Upstream(format!("metadata server token: {e}")))?;

        let token = AccessToken::valid_for(body.access_token, body.expires_in, Utc::now())
            .ok_or_else(|| {
                AvtaleError::Upstream(format!(
                    "metadata server token: expires_in out of range: {}",
                    body.expires_in
                ))
            })?;
        let request = request.bearer_auth(&token.token);
        *cached = Some(token);
        Ok(request)
    }

    async fn fetch_resource(&self, name: &str) -> Result<Option<ObjectResource>> {
        let request = self.authorize(self.http_client.get(self.object_url(name))).await?;
        let response = request
            .send()
            .await
            .map_err(|e| AvtaleError::Archive(format!("{name}: {e}")))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| AvtaleError::Archive(format!("{name}: invalid metadata: {e}"))),
            status => Err(AvtaleError::Archive(format!("{name}: bucket returned {status}"))),
        }
    }
}

/// Body of a GCS multipart upload: JSON resource, then the content
fn multipart_related_body(
    boundary: &str,
    resource: &serde_json::Value,
    content_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{resource}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl ArchivalSink for GcsBucketClient {
    async fn put_object(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=multipart",
            self.base(),
            self.config.bucket
        );
        let boundary = format!("avtaler-{}", Uuid::new_v4().simple());
        let resource = json!({
            "name": name,
            "contentType": content_type,
            "metadata": metadata,
        });
        let body = multipart_related_body(&boundary, &resource, content_type, &bytes);

        let request = self
            .http_client
            .post(&url)
            .header(
                "Content-Type",
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| AvtaleError::Archive(format!("{name}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AvtaleError::Archive(format!(
                "{name}: upload returned {status}: {text}"
            )));
        }

        info!(object = %name, size = bytes.len(), "Stored object in bucket");
        Ok(())
    }

    async fn object_exists(&self, name: &str) -> Result<bool> {
        Ok(self.fetch_resource(name).await?.is_some())
    }

    async fn get_object(&self, name: &str) -> Result<Option<StoredObject>> {
        let Some(resource) = self.fetch_resource(name).await? else {
            return Ok(None);
        };

        let request = self
            .authorize(
                self.http_client
                    .get(self.object_url(name))
                    .query(&[("alt", "media")]),
            )
            .await?;
        let response = request
            .send()
            .await
            .map_err(|e| AvtaleError::Archive(format!("{name}: {e}")))?;
        if !response.status().is_success() {
            return Err(AvtaleError::Archive(format!(
                "{name}: download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AvtaleError::Archive(format!("{name}: {e}")))?;

        debug!(object = %name, size = bytes.len(), "Read object from bucket");
        Ok(Some(StoredObject {
            name: resource.name,
            bytes,
            content_type: resource
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            metadata: resource.metadata.unwrap_or_default(),
        }))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/storage/v1/b/{}/o", self.base(), self.config.bucket);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("prefix", prefix), ("fields", "items(name),nextPageToken")];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let request = self.authorize(self.http_client.get(&url).query(&query)).await?;
            let response = request
                .send()
                .await
                .map_err(|e| AvtaleError::Archive(format!("list {prefix}: {e}")))?;
            if !response.status().is_success() {
                return Err(AvtaleError::Archive(format!(
                    "list {prefix}: bucket returned {}",
                    response.status()
                )));
            }
            let page: ObjectList = response
                .json()
                .await
                .map_err(|e| AvtaleError::Archive(format!("list {prefix}: {e}")))?;

            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Bucket kept in memory, for tests and local runs without storage
#[derive(Default)]
pub struct InMemoryBucket {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ArchivalSink for InMemoryBucket {
    async fn put_object(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        self.objects.write().await.insert(
            name.to_string(),
            StoredObject {
                name: name.to_string(),
                bytes,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn object_exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(name))
    }

    async fn get_object(&self, name: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().await.get(name).cloned())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}
