//! Ordered mutation queue.
//!
//! The engine talks to one [`MutationQueue`] interface. Two backends exist:
//! [`KvQueue`] keeps the whole queue as a single JSON list under one key of
//! the [`KvStore`](crate::kv::KvStore), [`SqlQueue`] keeps one row per entry
//! in the cache's `sync_queue` table. Both replay in insertion order.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::blobs::BlobHandle;
use crate::cache::CacheError;
use crate::kv::KvError;

mod kv_queue;
mod sql_queue;

pub use kv_queue::{KvQueue, PendingItem, QUEUE_KEY};
pub use sql_queue::SqlQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("key-value queue error: {0}")]
    Kv(#[from] KvError),

    #[error("sql queue error: {0}")]
    Cache(#[from] CacheError),
}

/// Identifier of a queued entry, unique within its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mutation about to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Endpoint URL or action name
    pub target: String,
    pub payload: Value,
    /// Staged blobs owned by the entry once queued
    pub images: Vec<BlobHandle>,
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub target: String,
    pub payload: Value,
    pub images: Vec<BlobHandle>,
}

#[async_trait]
pub trait MutationQueue: Send + Sync + fmt::Debug {
    /// Short name of the backend, for logs and status output.
    fn backend(&self) -> &'static str;

    /// Append an entry and assign its id.
    async fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError>;

    /// Every entry in replay order, read from durable storage.
    async fn list(&self) -> Result<Vec<QueueEntry>, QueueError>;

    /// Remove one entry. Returns whether it was present.
    async fn remove(&self, id: EntryId) -> Result<bool, QueueError>;

    /// Drop every entry, returning the discarded ones.
    async fn clear(&self) -> Result<Vec<QueueEntry>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.list().await?.len())
    }

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}
