//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use ::common::blobs::BlobStore;
use ::common::cache::Database;
use ::common::connectivity::ConnectivityMonitor;
use ::common::delivery::{Delivery, DeliveryError, DeliveryRequest};
use ::common::engine::{EngineConfig, SyncEngine};
use ::common::kv::KvStore;
use ::common::queue::{KvQueue, MutationQueue, SqlQueue};

/// 1x1 transparent PNG.
pub const PNG_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub const JPEG_BASE64: &str = "/9j/4AAQSkZJRgABAQAAAQABAAD/2wBDAAEBAQ==";

/// Delivery double that records what it accepted.
///
/// Payloads whose `n` field is in `reject` fail; `offline` fails everything.
#[derive(Debug, Default)]
pub struct MockDelivery {
    pub offline: AtomicBool,
    pub reject: Mutex<HashSet<i64>>,
    pub attempts: AtomicUsize,
    pub delivered: Mutex<Vec<DeliveryRequest>>,
}

impl MockDelivery {
    pub fn reject_n(&self, n: i64) {
        self.reject.lock().unwrap().insert(n);
    }

    pub fn accept_all(&self) {
        self.reject.lock().unwrap().clear();
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn delivered_ns(&self) -> Vec<i64> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.payload["n"].as_i64())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("backend unreachable".to_string()));
        }
        if let Some(n) = request.payload["n"].as_i64() {
            if self.reject.lock().unwrap().contains(&n) {
                return Err(DeliveryError::Rejected(format!("item {} rejected", n)));
            }
        }

        self.delivered.lock().unwrap().push(request.clone());
        Ok(())
    }
}

pub struct TestEnv {
    pub engine: Arc<SyncEngine>,
    pub delivery: Arc<MockDelivery>,
    pub blobs: BlobStore,
    pub kv: KvStore,
    pub db: Database,
    pub temp_dir: TempDir,
}

impl TestEnv {
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.engine.connectivity()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("common=debug")
        .with_test_writer()
        .try_init();
}

/// On-disk stores in a temp dir, engine on the KV queue.
pub async fn setup_test_env(online: bool) -> TestEnv {
    setup(online, false).await
}

/// Same as [`setup_test_env`] but queueing into the cache's `sync_queue`.
pub async fn setup_sql_test_env(online: bool) -> TestEnv {
    setup(online, true).await
}

async fn setup(online: bool, sql: bool) -> TestEnv {
    init_tracing();

    let temp_dir = TempDir::new().unwrap();
    let kv = KvStore::new(temp_dir.path().join("storage.db")).await.unwrap();
    let db = Database::new(temp_dir.path().join("cache.db")).await.unwrap();
    db.initialize().await.unwrap();
    let blobs = BlobStore::new_local(&temp_dir.path().join("blobs")).unwrap();

    let queue: Arc<dyn MutationQueue> = if sql {
        Arc::new(SqlQueue::new(db.clone()))
    } else {
        Arc::new(KvQueue::new(kv.clone()))
    };

    let delivery = Arc::new(MockDelivery::default());
    let engine = SyncEngine::new(
        queue,
        blobs.clone(),
        delivery.clone(),
        ConnectivityMonitor::new(online),
        EngineConfig::default(),
    );

    TestEnv {
        engine: Arc::new(engine),
        delivery,
        blobs,
        kv,
        db,
        temp_dir,
    }
}
