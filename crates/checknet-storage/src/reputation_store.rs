// REPUTATION STORE
// Writes finished reputation records to durable storage and reads them back.
//
// Key layout: <lower(deviceId)>-<millis>.json
//
// SAFETY INVARIANTS:
// 1. Suffixes are strictly increasing within the process, so two writes never share a key
// 2. The newest record for a device is the one with the largest suffix
// 3. A record is stamped with its own location before it is written
// 4. Failures are returned to the caller, never panicked past this boundary

use crate::object_store::{ObjectStore, StorageError};
use checknet_core::{canonical_json, StandardizedReputation, StorageDetails, StorageSettings};
use chrono::Utc;
use log::{info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy for storage calls.
///
/// `attempts` counts every call including the first. The delay doubles after each
/// failure, starting at `base_delay` and clamped to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// One attempt per call.
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `max_retries` retries on top of the first attempt.
    pub fn from_settings(settings: &StorageSettings) -> Self {
        RetryPolicy {
            attempts: settings.max_retries.saturating_add(1),
            base_delay: settings.retry_base_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct ReputationStore {
    backend: Arc<dyn ObjectStore>,
    bucket: String,
    retry: RetryPolicy,
    last_suffix: AtomicU64,
}

impl ReputationStore {
    pub fn new(backend: Arc<dyn ObjectStore>, bucket: impl Into<String>, retry: RetryPolicy) -> Self {
        ReputationStore {
            backend,
            bucket: bucket.into(),
            retry,
            last_suffix: AtomicU64::new(0),
        }
    }

    pub fn from_settings(backend: Arc<dyn ObjectStore>, settings: &StorageSettings) -> Self {
        Self::new(backend, settings.bucket.clone(), RetryPolicy::from_settings(settings))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write `record` under a fresh key for `device_id`; returns where it landed.
    pub async fn persist(
        &self,
        device_id: &str,
        mut record: StandardizedReputation,
    ) -> Result<StorageDetails, StorageError> {
        info!("Storing reputation data for device {}", device_id);
        self.with_retry("ensure bucket", || self.backend.ensure_namespace(&self.bucket))
            .await?;

        let key = self.next_key(device_id);
        let details = StorageDetails {
            bucket: self.bucket.clone(),
            path: key.clone(),
            url: self.backend.object_url(&self.bucket, &key),
        };
        record.storage_details = details.clone();
        let body = canonical_json(&record)?;

        self.with_retry("upload", || self.backend.put_object(&self.bucket, &key, body.clone()))
            .await?;
        info!("Reputation data stored for device {} at {}/{}", device_id, self.bucket, key);
        Ok(details)
    }

    /// Most recent record for `device_id`, if any.
    pub async fn latest(&self, device_id: &str) -> Result<Option<StandardizedReputation>, StorageError> {
        let keys = self.keys_for(device_id).await?;
        match keys.last() {
            Some((_, key)) => self.load(key).await,
            None => Ok(None),
        }
    }

    /// All records for `device_id`, newest first.
    pub async fn history(&self, device_id: &str) -> Result<Vec<StandardizedReputation>, StorageError> {
        let keys = self.keys_for(device_id).await?;
        let mut records = Vec::with_capacity(keys.len());
        for (_, key) in keys.iter().rev() {
            if let Some(record) = self.load(key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn load(&self, key: &str) -> Result<Option<StandardizedReputation>, StorageError> {
        match self.backend.get_object(&self.bucket, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Keys belonging to `device_id`, ascending by suffix.
    async fn keys_for(&self, device_id: &str) -> Result<Vec<(u64, String)>, StorageError> {
        let device = device_id.to_lowercase();
        let mut keys: Vec<(u64, String)> = self
            .backend
            .list_objects(&self.bucket)
            .await?
            .into_iter()
            .filter_map(|name| {
                let (owner, suffix) = parse_key(&name)?;
                (owner == device).then_some((suffix, name))
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn next_key(&self, device_id: &str) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let previous = self
            .last_suffix
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        let suffix = now.max(previous + 1);
        format!("{}-{}.json", device_id.to_lowercase(), suffix)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Storage {} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, self.retry.attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Storage {} failed after {} attempt(s): {}", operation, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

/// Split `<device>-<suffix>.json` into its parts.
pub fn parse_key(key: &str) -> Option<(&str, u64)> {
    let stem = key.strip_suffix(".json")?;
    let (device, suffix) = stem.rsplit_once('-')?;
    if device.is_empty() {
        return None;
    }
    Some((device, suffix.parse().ok()?))
}
