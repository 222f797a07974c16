use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::{EntryId, MutationQueue, NewEntry, QueueEntry, QueueError};
use crate::blobs::BlobHandle;
use crate::kv::KvStore;

/// Key holding the serialized pending list.
pub const QUEUE_KEY: &str = "offline_api_queue";

/// Stored form of one queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    pub id: i64,
    pub url: String,
    pub data: Value,
    #[serde(default)]
    pub image_files: Vec<BlobHandle>,
}

impl From<PendingItem> for QueueEntry {
    fn from(item: PendingItem) -> Self {
        QueueEntry {
            id: EntryId(item.id),
            target: item.url,
            payload: item.data,
            images: item.image_files,
        }
    }
}

/// Queue kept as one JSON list in the key-value store.
///
/// Every mutation re-reads the persisted list inside one store transaction,
/// so concurrent pushes and removals never overwrite each other, including
/// those from another process sharing the file.
#[derive(Debug, Clone)]
pub struct KvQueue {
    kv: KvStore,
}

impl KvQueue {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }
}

/// Wall-clock millis, bumped past the newest existing id.
fn next_id(items: &[PendingItem]) -> i64 {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    match items.iter().map(|i| i.id).max() {
        Some(last) if last >= now => last + 1,
        _ => now,
    }
}

#[async_trait]
impl MutationQueue for KvQueue {
    fn backend(&self) -> &'static str {
        "kv"
    }

    async fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let item = self
            .kv
            .update(QUEUE_KEY, |items: &mut Vec<PendingItem>| {
                let item = PendingItem {
                    id: next_id(items),
                    url: entry.target,
                    data: entry.payload,
                    image_files: entry.images,
                };
                items.push(item.clone());
                item
            })
            .await?;

        debug!(id = item.id, url = %item.url, "pending item queued");
        Ok(item.into())
    }

    async fn list(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let items: Vec<PendingItem> = self.kv.get(QUEUE_KEY).await?.unwrap_or_default();
        Ok(items.into_iter().map(QueueEntry::from).collect())
    }

    async fn remove(&self, id: EntryId) -> Result<bool, QueueError> {
        let removed = self
            .kv
            .update(QUEUE_KEY, |items: &mut Vec<PendingItem>| {
                let before = items.len();
                items.retain(|item| item.id != id.0);
                items.len() != before
            })
            .await?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let items = self
            .kv
            .update(QUEUE_KEY, |items: &mut Vec<PendingItem>| std::mem::take(items))
            .await?;
        Ok(items.into_iter().map(QueueEntry::from).collect())
    }
}
