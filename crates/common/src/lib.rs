//! Offline write-behind synchronization.
//!
//! Mutations bound for a remote API are captured in a durable local queue
//! while the device is offline (or the backend is unreachable) and replayed
//! in order once connectivity returns. The crate is split into leaf stores
//! and the engine that coordinates them:
//!
//! - [`blobs`]: named image files staged alongside queued mutations
//! - [`kv`]: durable key-value store holding the list-style queue
//! - [`cache`]: relational cache (session, profile, products, sync_queue)
//! - [`connectivity`]: online/offline state with change subscriptions
//! - [`delivery`]: the remote collaborator that accepts replayed mutations
//! - [`queue`]: one ordered-queue interface with KV and SQL backends
//! - [`engine`]: submit/drain state machine and its mailbox worker
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use common::blobs::BlobStore;
//! use common::connectivity::ConnectivityMonitor;
//! use common::delivery::HttpDelivery;
//! use common::engine::{EngineConfig, SyncEngine};
//! use common::kv::KvStore;
//! use common::queue::KvQueue;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let kv = KvStore::in_memory().await?;
//! let blobs = BlobStore::new_ephemeral();
//! let delivery = HttpDelivery::new(&"https://api.example.com/".parse()?, None)?;
//! let connectivity = ConnectivityMonitor::new(false);
//!
//! let engine = SyncEngine::new(
//!     Arc::new(KvQueue::new(kv)),
//!     blobs,
//!     Arc::new(delivery),
//!     connectivity.clone(),
//!     EngineConfig::default(),
//! );
//!
//! // Offline: the mutation lands in the queue.
//! engine
//!     .submit("items", serde_json::json!({ "name": "widget" }), vec![])
//!     .await?;
//!
//! // Reconnect and replay.
//! connectivity.set_online(true);
//! engine.drain().await?;
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod cache;
pub mod connectivity;
pub mod delivery;
pub mod engine;
pub mod kv;
pub mod queue;

pub mod prelude {
    pub use crate::blobs::{BlobHandle, BlobStore, BlobStoreError};
    pub use crate::cache::{AuthSession, CacheError, Database, Product, Profile, ServerSnapshot};
    pub use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus, Subscription};
    pub use crate::delivery::{Delivery, DeliveryError, DeliveryRequest, HttpDelivery};
    pub use crate::engine::{
        DrainOutcome, DrainReport, EngineConfig, EngineError, EngineHandle, EngineState,
        SubmitOutcome, SyncEngine,
    };
    pub use crate::kv::{KvError, KvStore};
    pub use crate::queue::{
        EntryId, KvQueue, MutationQueue, NewEntry, QueueEntry, QueueError, SqlQueue,
    };
}
