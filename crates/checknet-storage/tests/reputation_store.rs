// Reputation store over in-memory, flaky and HTTP object stores.

use async_trait::async_trait;
use checknet_core::{
    canonical_json, AvailabilityMetrics, CheckerMetrics, ConsensusRound, LatencyPercentiles, PerformanceMetrics, Proof, RoundStatus,
    SecurityMetrics, StandardizedReputation, StorageDetails, StorageSettings, ZERO_HASH,
};
use checknet_storage::{
    parse_key, HttpObjectStore, MemoryObjectStore, ObjectStore, ReputationStore, RetryPolicy, StorageError,
};
use chrono::Utc;
use futures::TryStreamExt;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warp::http::StatusCode;
use warp::hyper::body::Buf;
use warp::multipart::FormData;
use warp::Filter;

fn record(device_id: &str, score: f64) -> StandardizedReputation {
    let now = Utc::now();
    StandardizedReputation {
        version: "1.0.0".to_string(),
        network_id: "checker-network-mainnet".to_string(),
        subnet_id: "franky-device-checker".to_string(),
        device_id: device_id.to_string(),
        round: ConsensusRound {
            round_id: ConsensusRound::derive_id(device_id, &now, "0xchecker"),
            device_id: device_id.to_string(),
            start_time: now,
            end_time: Some(now),
            participants: vec!["0xchecker".to_string()],
            votes: Vec::new(),
            status: RoundStatus::Complete,
            final_score: Some(score),
        },
        quorum: 1,
        consensus_threshold: 1.0,
        proof: Proof {
            checker_id: "0xchecker".to_string(),
            timestamp: now,
            signature: "0x00".to_string(),
            nonce: "0x01".to_string(),
            block_height: 1,
            previous_proof_hash: ZERO_HASH.to_string(),
        },
        metrics: CheckerMetrics {
            availability: AvailabilityMetrics {
                uptime_pct: 100.0,
                avg_response_time_ms: 200.0,
                consistency: 0.0,
                last_seen: Some(now),
            },
            performance: PerformanceMetrics {
                throughput_per_sec: 1.0,
                error_rate: 0.0,
                latency: LatencyPercentiles { p50: 200.0, p95: 200.0, p99: 200.0 },
            },
            security: SecurityMetrics {
                tls_version: "TLS 1.3".to_string(),
                certificate_valid: true,
                last_updated: now,
            },
        },
        checks: Vec::new(),
        previous_reputation_hash: ZERO_HASH.to_string(),
        created_at: now,
        updated_at: now,
        storage_protocol: "filecoin".to_string(),
        storage_details: StorageDetails {
            bucket: "device-reputation".to_string(),
            path: String::new(),
            url: None,
        },
    }
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::none()
}

#[tokio::test]
async fn test_persist_then_read_back_latest_and_history() {
    let backend = Arc::new(MemoryObjectStore::new());
    let store = ReputationStore::new(backend.clone(), "device-reputation", no_retry());

    let first = store.persist("0xDevice", record("0xDevice", 70.0)).await.unwrap();
    let second = store.persist("0xDevice", record("0xDevice", 80.0)).await.unwrap();
    store.persist("0xOther", record("0xOther", 10.0)).await.unwrap();

    assert!(first.path.starts_with("0xdevice-"));
    assert_ne!(first.path, second.path);
    assert!(parse_key(&first.path).unwrap().1 < parse_key(&second.path).unwrap().1);
    assert_eq!(backend.object_count("device-reputation"), 3);

    let latest = store.latest("0xDevice").await.unwrap().unwrap();
    assert_eq!(latest.score(), Some(80.0));
    assert_eq!(latest.storage_details, second);

    let stored = backend.get_object("device-reputation", &second.path).await.unwrap().unwrap();
    assert_eq!(stored, canonical_json(&latest).unwrap());
    assert!(!stored.contains(&b'\n'));

    let history = store.history("0xdevice").await.unwrap();
    let scores: Vec<Option<f64>> = history.iter().map(|r| r.score()).collect();
    assert_eq!(scores, vec![Some(80.0), Some(70.0)]);

    assert!(store.latest("0xNobody").await.unwrap().is_none());
}

/// Fails the first `failures` uploads, then delegates.
struct FlakyStore {
    inner: MemoryObjectStore,
    failures: usize,
    uploads: AtomicUsize,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        self.inner.ensure_namespace(namespace).await
    }

    async fn put_object(&self, namespace: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        if self.uploads.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(StorageError::Unavailable("gateway timeout".to_string()));
        }
        self.inner.put_object(namespace, key, body).await
    }

    async fn get_object(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get_object(namespace, key).await
    }

    async fn list_objects(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list_objects(namespace).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_with_backoff() {
    let backend = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        failures: 2,
        uploads: AtomicUsize::new(0),
    });
    let policy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };
    let store = ReputationStore::new(backend.clone(), "bucket", policy);

    let started = tokio::time::Instant::now();
    store.persist("0xa", record("0xa", 50.0)).await.unwrap();

    assert_eq!(backend.uploads.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_configured_retries_follow_first_attempt() {
    let backend = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        failures: 3,
        uploads: AtomicUsize::new(0),
    });
    let settings = StorageSettings {
        bucket: "bucket".to_string(),
        retry_max_delay_ms: 3_000,
        ..StorageSettings::default()
    };
    let store = ReputationStore::from_settings(backend.clone(), &settings);

    let started = tokio::time::Instant::now();
    store.persist("0xa", record("0xa", 50.0)).await.unwrap();

    // Three retries: 1s, 2s, then 4s clamped to 3s.
    assert_eq!(backend.uploads.load(Ordering::SeqCst), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_upload_gives_up_after_attempts() {
    let backend = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        failures: 10,
        uploads: AtomicUsize::new(0),
    });
    let policy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    };
    let store = ReputationStore::new(backend.clone(), "bucket", policy);

    let result = store.persist("0xa", record("0xa", 50.0)).await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));
    assert_eq!(backend.uploads.load(Ordering::SeqCst), 3);
    assert_eq!(backend.inner.object_count("bucket"), 0);
}

type Buckets = Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>;

/// Fake bucket API; returns its address and the number of bucket create requests.
/// With `stale_lookup` the existence check always answers 404, as a racing writer would see it.
fn spawn_bucket_api(stale_lookup: bool) -> (SocketAddr, Arc<AtomicUsize>) {
    let buckets: Buckets = Arc::new(Mutex::new(HashMap::new()));
    let creates = Arc::new(AtomicUsize::new(0));
    let state = {
        let buckets = buckets.clone();
        warp::any().map(move || buckets.clone())
    };

    let exists = warp::path!("buckets" / String)
        .and(warp::get())
        .and(state.clone())
        .map(move |bucket: String, buckets: Buckets| {
            let code = if !stale_lookup && buckets.lock().unwrap().contains_key(&bucket) {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            warp::reply::with_status(warp::reply::json(&json!({"name": bucket})), code)
        });

    let counter = creates.clone();
    let create = warp::path!("buckets")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .map(move |body: serde_json::Value, buckets: Buckets| {
            let name = body["name"].as_str().unwrap_or_default().to_string();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut guard = buckets.lock().unwrap();
            if guard.contains_key(&name) {
                return warp::reply::with_status(
                    warp::reply::json(&json!({"error": "bucket already exists"})),
                    StatusCode::CONFLICT,
                );
            }
            guard.insert(name, BTreeMap::new());
            warp::reply::with_status(warp::reply::json(&json!({"success": true})), StatusCode::OK)
        });

    let upload = warp::path!("buckets" / String / "files")
        .and(warp::post())
        .and(warp::multipart::form().max_length(5_000_000))
        .and(state.clone())
        .and_then(|bucket: String, form: FormData, buckets: Buckets| async move {
            let mut form = form;
            let mut stored = Vec::new();
            while let Some(part) = form.try_next().await.map_err(|_| warp::reject())? {
                if part.name() != "file" {
                    continue;
                }
                let name = part.filename().unwrap_or("unnamed").to_string();
                let data = part
                    .stream()
                    .try_fold(Vec::new(), |mut acc, mut buf| async move {
                        let bytes = buf.copy_to_bytes(buf.remaining());
                        acc.extend_from_slice(&bytes);
                        Ok(acc)
                    })
                    .await
                    .map_err(|_| warp::reject())?;
                stored.push((name, data));
            }

            let mut guard = buckets.lock().unwrap();
            let code = match guard.get_mut(&bucket) {
                Some(objects) => {
                    objects.extend(stored);
                    StatusCode::OK
                }
                None => StatusCode::NOT_FOUND,
            };
            Ok::<_, warp::Rejection>(warp::reply::with_status(warp::reply::json(&json!({"success": true})), code))
        });

    let list = warp::path!("buckets" / String / "files")
        .and(warp::get())
        .and(state.clone())
        .map(|bucket: String, buckets: Buckets| {
            let names: Vec<String> = buckets
                .lock()
                .unwrap()
                .get(&bucket)
                .map(|objects| objects.keys().cloned().collect())
                .unwrap_or_default();
            warp::reply::json(&json!({"success": true, "data": names}))
        });

    let download = warp::path!("buckets" / String / "files" / String / "download")
        .and(warp::get())
        .and(state)
        .map(|bucket: String, key: String, buckets: Buckets| {
            match buckets.lock().unwrap().get(&bucket).and_then(|o| o.get(&key)).cloned() {
                Some(data) => warp::reply::with_status(data, StatusCode::OK),
                None => warp::reply::with_status(Vec::new(), StatusCode::NOT_FOUND),
            }
        });

    let routes = exists.or(create).or(upload).or(list).or(download);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, creates)
}

#[tokio::test]
async fn test_http_backend_round_trip() {
    let (addr, creates) = spawn_bucket_api(false);
    let backend = Arc::new(HttpObjectStore::with_client(reqwest::Client::new(), &format!("http://{}/", addr)));
    let store = ReputationStore::new(backend, "device-reputation", no_retry());

    let details = store.persist("0xDevice", record("0xDevice", 88.49)).await.unwrap();
    store.persist("0xDevice", record("0xDevice", 91.0)).await.unwrap();

    // The bucket is created once, then found.
    assert_eq!(creates.load(Ordering::SeqCst), 1);
    assert_eq!(
        details.url.as_deref(),
        Some(format!("http://{}/buckets/device-reputation/files/{}/download", addr, details.path).as_str())
    );

    let history = store.history("0xDevice").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].score(), Some(91.0));
    assert_eq!(history[1].score(), Some(88.49));
    assert_eq!(history[1].storage_details, details);
}

#[tokio::test]
async fn test_http_backend_treats_bucket_conflict_as_existing() {
    let (addr, creates) = spawn_bucket_api(true);
    let backend = HttpObjectStore::with_client(reqwest::Client::new(), &format!("http://{}", addr));

    backend.ensure_namespace("device-reputation").await.unwrap();
    // The lookup misses again, so the second create collides with the first.
    backend.ensure_namespace("device-reputation").await.unwrap();
    assert_eq!(creates.load(Ordering::SeqCst), 2);

    backend
        .put_object("device-reputation", "0xa-1.json", b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(backend.list_objects("device-reputation").await.unwrap(), vec!["0xa-1.json"]);
}

#[tokio::test]
async fn test_http_backend_reports_unreachable_storage() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let backend = Arc::new(HttpObjectStore::with_client(reqwest::Client::new(), &format!("http://{}", closed)));
    let store = ReputationStore::new(backend, "device-reputation", no_retry());

    assert!(matches!(
        store.persist("0xa", record("0xa", 1.0)).await,
        Err(StorageError::Request(_))
    ));
}
