//! Stores and engine wired up from a state directory.
//!
//! Every store is opened once here and shared by reference with the engine,
//! so CLI operations and the watch service see the same durable state.

use std::sync::Arc;

use common::blobs::{BlobStore, BlobStoreError};
use common::cache::{CacheError, CacheTable, Database};
use common::connectivity::{ConnectivityMonitor, ConnectivityProbe, HttpProbe};
use common::delivery::{Delivery, DeliveryError, HttpDelivery};
use common::engine::{EngineConfig, EngineError, SyncEngine};
use common::kv::{KvError, KvStore};
use common::queue::{KvQueue, MutationQueue, SqlQueue};

use crate::state::{AppState, QueueBackend};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("blob store error: {0}")]
    Blobs(#[from] BlobStoreError),

    #[error("delivery setup failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("probe setup failed: {0}")]
    Probe(#[from] reqwest::Error),
}

/// What a logout discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutReport {
    pub discarded_items: usize,
    pub remaining_blobs: usize,
}

#[derive(Debug, Clone)]
pub struct Services {
    pub state: AppState,
    pub cache: Database,
    pub kv: KvStore,
    pub blobs: BlobStore,
    pub connectivity: ConnectivityMonitor,
    pub engine: Arc<SyncEngine>,
}

impl Services {
    /// Open every store and build an engine delivering over HTTP.
    pub async fn open(state: &AppState) -> Result<Self, ServiceError> {
        let delivery = HttpDelivery::new(&state.config.api_url, None)?;
        Self::with_delivery(state, Arc::new(delivery)).await
    }

    /// Same as [`Services::open`] with a caller-supplied delivery.
    pub async fn with_delivery(
        state: &AppState,
        delivery: Arc<dyn Delivery>,
    ) -> Result<Self, ServiceError> {
        let cache = Database::new(&state.cache_path).await?;
        cache.initialize().await?;
        let kv = KvStore::new(&state.storage_path).await?;
        let blobs = BlobStore::new_local(&state.blobs_path)?;

        let queue: Arc<dyn MutationQueue> = match state.config.queue_backend {
            QueueBackend::Kv => Arc::new(KvQueue::new(kv.clone())),
            QueueBackend::Sql => Arc::new(SqlQueue::new(cache.clone())),
        };

        // Offline until something says otherwise
        let connectivity = ConnectivityMonitor::new(false);
        let engine = SyncEngine::new(
            queue,
            blobs.clone(),
            delivery,
            connectivity.clone(),
            EngineConfig {
                delivery_timeout: state.config.delivery_timeout(),
            },
        );
        engine.refresh().await?;

        tracing::debug!(
            backend = %state.config.queue_backend,
            dir = %state.state_dir.display(),
            "services opened"
        );

        Ok(Self {
            state: state.clone(),
            cache,
            kv,
            blobs,
            connectivity,
            engine: Arc::new(engine),
        })
    }

    /// Probe for the configured health URL, if any.
    pub fn probe(&self) -> Result<Option<HttpProbe>, ServiceError> {
        match &self.state.config.health_url {
            Some(url) => Ok(Some(HttpProbe::new(
                url.clone(),
                self.state.config.delivery_timeout(),
            )?)),
            None => Ok(None),
        }
    }

    /// Probe once and record the result. Without a health URL the backend is
    /// assumed reachable.
    pub async fn check_connectivity(&self) -> Result<bool, ServiceError> {
        let online = match self.probe()? {
            Some(probe) => probe.check().await,
            None => true,
        };
        self.connectivity.set_online(online);
        Ok(online)
    }

    /// Drop all local user state: the queue and the blobs it owns, the
    /// relational cache, and the key-value store.
    pub async fn logout(&self) -> Result<LogoutReport, ServiceError> {
        let discarded_items = self.engine.purge().await?;
        self.cache.purge_all().await?;
        self.kv.clear().await?;

        let remaining_blobs = self.blobs.list().await?.len();
        tracing::info!(discarded_items, remaining_blobs, "logged out");
        Ok(LogoutReport {
            discarded_items,
            remaining_blobs,
        })
    }

    pub async fn product_count(&self) -> Result<i64, ServiceError> {
        Ok(self.cache.count_rows(CacheTable::Products).await?)
    }
}
