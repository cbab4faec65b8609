// OBJECT STORAGE BACKENDS
// Namespaced key/value blobs. The reputation store is the only writer.
//
// SAFETY INVARIANTS:
// 1. ensure_namespace is idempotent (create-if-absent); a conflicting create counts as success
// 2. put_object never overwrites silently: keys are chosen unique by the caller
// 3. Backends do not retry; retry policy lives in the reputation store

use async_trait::async_trait;
use checknet_core::StorageSettings;
use log::{debug, info};
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Unexpected file listing: {0}")]
    Listing(String),

    #[error("Namespace {0} does not exist")]
    NoSuchNamespace(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError>;

    async fn put_object(&self, namespace: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// `Ok(None)` when the key does not exist.
    async fn get_object(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn list_objects(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Public location of an object, when the backend has one.
    fn object_url(&self, _namespace: &str, _key: &str) -> Option<String> {
        None
    }
}

/// Bucket API over HTTP:
///
///   GET  /buckets/{b}                     bucket exists?
///   POST /buckets          {name}         create bucket
///   POST /buckets/{b}/files               multipart upload, part "file"
///   GET  /buckets/{b}/files               {success, data: [names]}
///   GET  /buckets/{b}/files/{key}/download
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self::with_client(client, &settings.url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        HttpObjectStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn bucket_url(&self, namespace: &str) -> String {
        format!("{}/buckets/{}", self.base_url, namespace)
    }
}

async fn status_error(operation: &'static str, response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Status {
        operation,
        status,
        body,
    }
}

/// File names from a listing; entries may be plain names or objects carrying one.
fn listing_names(listing: Value) -> Result<Vec<String>, StorageError> {
    if listing.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(StorageError::Listing("backend reported failure".to_string()));
    }
    let entries = match listing.get("data") {
        Some(Value::Array(entries)) => entries,
        _ => return Err(StorageError::Listing("missing data array".to_string())),
    };
    Ok(entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(fields) => fields
                .get("name")
                .or_else(|| fields.get("Name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect())
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        let check = self.client.get(self.bucket_url(namespace)).send().await?;
        if check.status().is_success() {
            debug!("Bucket {} already exists", namespace);
            return Ok(());
        }

        info!("Creating storage bucket {}", namespace);
        let create = self
            .client
            .post(format!("{}/buckets", self.base_url))
            .json(&serde_json::json!({ "name": namespace }))
            .send()
            .await?;
        if create.status().is_success() || create.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        match status_error("create bucket", create).await {
            // Lost a create race against a concurrent writer.
            StorageError::Status { body, .. } if body.to_lowercase().contains("already exists") => {
                debug!("Bucket {} was created concurrently", namespace);
                Ok(())
            }
            err => Err(err),
        }
    }

    async fn put_object(&self, namespace: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let part = Part::bytes(body)
            .file_name(key.to_string())
            .mime_str("application/json")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.bucket_url(namespace)))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error("upload", response).await);
        }
        Ok(())
    }

    async fn get_object(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self
            .client
            .get(format!("{}/files/{}/download", self.bucket_url(namespace), key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error("download", response).await);
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn list_objects(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let response = self
            .client
            .get(format!("{}/files", self.bucket_url(namespace)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error("list files", response).await);
        }
        listing_names(response.json().await?)
    }

    fn object_url(&self, namespace: &str, key: &str) -> Option<String> {
        Some(format!("{}/files/{}/download", self.bucket_url(namespace), key))
    }
}

/// In-process object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self, namespace: &str) -> usize {
        self.namespaces.lock().get(namespace).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        self.namespaces.lock().entry(namespace.to_string()).or_default();
        Ok(())
    }

    async fn put_object(&self, namespace: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let mut namespaces = self.namespaces.lock();
        let objects = namespaces
            .get_mut(namespace)
            .ok_or_else(|| StorageError::NoSuchNamespace(namespace.to_string()))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .and_then(|objects| objects.get(key).cloned()))
    }

    async fn list_objects(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let namespaces = self.namespaces.lock();
        let objects = namespaces
            .get(namespace)
            .ok_or_else(|| StorageError::NoSuchNamespace(namespace.to_string()))?;
        Ok(objects.keys().cloned().collect())
    }
}
