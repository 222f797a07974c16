//! Submit/drain state machine.
//!
//! [`SyncEngine`] owns the mutation queue on behalf of callers. A submit
//! stages attached images in the blob store, then either delivers at once
//! (online) or queues the mutation. A drain replays the queue in insertion
//! order and stops at the first failure; the failed entry and everything
//! behind it stay queued for the next drain.
//!
//! The engine can be called directly, but in a running process it is owned
//! by a single worker task (see [`EngineHandle`]) so that submits and drains
//! never interleave.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::blobs::{BlobHandle, BlobStore, BlobStoreError};
use crate::connectivity::ConnectivityMonitor;
use crate::delivery::{Delivery, DeliveryError, DeliveryRequest};
use crate::queue::{EntryId, MutationQueue, NewEntry, QueueEntry};

mod error;
mod worker;

pub use error::EngineError;
pub use worker::{run_worker, EngineHandle, Job, JobReceiver};

/// Default bound on a single delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Draining,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A delivery that takes longer than this counts as failed
    pub delivery_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Delivered immediately; staged images were deleted
    Delivered,
    /// Persisted for a later drain
    Queued(QueueEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyDraining,
    EmptyQueue,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::AlreadyDraining => write!(f, "a drain is already running"),
            SkipReason::EmptyQueue => write!(f, "queue is empty"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    /// Entry whose delivery failed and stopped the pass
    pub halted_at: Option<EntryId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

pub struct SyncEngine {
    queue: Arc<dyn MutationQueue>,
    blobs: BlobStore,
    delivery: Arc<dyn Delivery>,
    connectivity: ConnectivityMonitor,
    config: EngineConfig,
    state: Mutex<EngineState>,
    /// Last queue contents read from durable storage
    pending: RwLock<Vec<QueueEntry>>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("backend", &self.queue.backend())
            .field("state", &*self.state.lock())
            .field("pending", &self.pending.read().len())
            .finish()
    }
}

/// Resets the engine to `Idle` when a drain ends, however it ends.
struct DrainGuard<'a>(&'a Mutex<EngineState>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = EngineState::Idle;
    }
}

impl SyncEngine {
    pub fn new(
        queue: Arc<dyn MutationQueue>,
        blobs: BlobStore,
        delivery: Arc<dyn Delivery>,
        connectivity: ConnectivityMonitor,
        config: EngineConfig,
    ) -> Self {
        Self {
            queue,
            blobs,
            delivery,
            connectivity,
            config,
            state: Mutex::new(EngineState::Idle),
            pending: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn queue(&self) -> &Arc<dyn MutationQueue> {
        &self.queue
    }

    /// The mirror as of the last refresh.
    pub fn pending_items(&self) -> Vec<QueueEntry> {
        self.pending.read().clone()
    }

    /// Re-read the queue from durable storage into the mirror.
    pub async fn refresh(&self) -> Result<Vec<QueueEntry>, EngineError> {
        let entries = self.queue.list().await?;
        *self.pending.write() = entries.clone();
        Ok(entries)
    }

    /// Send a mutation now if possible, otherwise queue it.
    ///
    /// `images` are base64 payloads, optionally with a data-URI header. An
    /// image that fails to stage is logged and left out.
    pub async fn submit(
        &self,
        url: &str,
        data: Value,
        images: Vec<String>,
    ) -> Result<SubmitOutcome, EngineError> {
        let staged = self.stage_images(&images).await;
        let entry = NewEntry {
            target: url.to_string(),
            payload: data,
            images: staged,
        };

        if self.connectivity.is_online() {
            match self
                .send(&entry.target, &entry.payload, &entry.images)
                .await
            {
                Ok(()) => {
                    self.delete_blobs(&entry.images).await;
                    info!(url, "mutation delivered");
                    return Ok(SubmitOutcome::Delivered);
                }
                Err(e) => {
                    warn!(url, error = %e, "immediate delivery failed, queueing");
                }
            }
        } else {
            debug!(url, "offline, queueing");
        }

        self.enqueue(entry).await.map(SubmitOutcome::Queued)
    }

    /// Persist an entry and refresh the mirror.
    ///
    /// If the write fails the entry's staged blobs are deleted, since nothing
    /// will ever reference them.
    pub async fn enqueue(&self, entry: NewEntry) -> Result<QueueEntry, EngineError> {
        let images = entry.images.clone();
        let queued = match self.queue.push(entry).await {
            Ok(queued) => queued,
            Err(e) => {
                self.delete_blobs(&images).await;
                return Err(e.into());
            }
        };

        info!(id = %queued.id, url = %queued.target, "mutation queued");
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "failed to refresh pending mirror");
        }
        Ok(queued)
    }

    /// Replay queued entries in order, stopping at the first failure.
    pub async fn drain(&self) -> Result<DrainOutcome, EngineError> {
        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }

        {
            let mut state = self.state.lock();
            if *state == EngineState::Draining {
                return Ok(DrainOutcome::Skipped(SkipReason::AlreadyDraining));
            }
            *state = EngineState::Draining;
        }
        let _guard = DrainGuard(&self.state);

        let snapshot = self.queue.list().await?;
        if snapshot.is_empty() {
            *self.pending.write() = snapshot;
            return Ok(DrainOutcome::Skipped(SkipReason::EmptyQueue));
        }

        info!(count = snapshot.len(), backend = self.queue.backend(), "draining queue");
        let mut report = DrainReport::default();
        let mut persistence_error = None;

        for entry in snapshot {
            match self
                .send(&entry.target, &entry.payload, &entry.images)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.queue.remove(entry.id).await {
                        warn!(id = %entry.id, error = %e, "failed to remove delivered mutation");
                        persistence_error = Some(e);
                        break;
                    }
                    self.delete_blobs(&entry.images).await;
                    report.delivered += 1;
                    debug!(id = %entry.id, "queued mutation delivered");
                }
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "delivery failed, stopping drain");
                    report.halted_at = Some(entry.id);
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        let refreshed = self.refresh().await;
        if let Some(e) = persistence_error {
            if let Err(refresh_error) = refreshed {
                warn!(error = %refresh_error, "failed to refresh pending mirror");
            }
            return Err(e.into());
        }
        report.remaining = refreshed?.len();
        info!(
            delivered = report.delivered,
            remaining = report.remaining,
            "drain finished"
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// Discard every queued entry and the blobs it owns.
    pub async fn purge(&self) -> Result<usize, EngineError> {
        let discarded = self.queue.clear().await?;
        for entry in &discarded {
            self.delete_blobs(&entry.images).await;
        }
        *self.pending.write() = Vec::new();
        info!(discarded = discarded.len(), "queue purged");
        Ok(discarded.len())
    }

    async fn stage_images(&self, images: &[String]) -> Vec<BlobHandle> {
        let mut staged = Vec::with_capacity(images.len());
        for (index, encoded) in images.iter().enumerate() {
            match self.blobs.save(encoded).await {
                Ok(handle) => staged.push(handle),
                Err(e) => warn!(index, error = %e, "failed to stage image, dropping it"),
            }
        }
        staged
    }

    /// Read staged images back in transport encoding. Missing blobs are skipped.
    async fn load_images(&self, handles: &[BlobHandle]) -> Result<Vec<String>, BlobStoreError> {
        let mut images = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.blobs.read(handle).await {
                Ok(encoded) => images.push(encoded),
                Err(e) if e.is_not_found() => {
                    warn!(handle = %handle, "staged image missing, sending without it");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(images)
    }

    async fn send(
        &self,
        target: &str,
        payload: &Value,
        handles: &[BlobHandle],
    ) -> Result<(), EngineError> {
        let request = DeliveryRequest {
            endpoint: target.to_string(),
            payload: payload.clone(),
            images: self.load_images(handles).await?,
        };

        let timeout = self.config.delivery_timeout;
        match tokio::time::timeout(timeout, self.delivery.deliver(&request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DeliveryError::Timeout(timeout).into()),
        }
    }

    async fn delete_blobs(&self, handles: &[BlobHandle]) {
        for handle in handles {
            if let Err(e) = self.blobs.delete(handle).await {
                warn!(handle = %handle, error = %e, "failed to delete staged image");
            }
        }
    }
}
