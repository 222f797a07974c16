use async_trait::async_trait;
use tracing::debug;

use super::{EntryId, MutationQueue, NewEntry, QueueEntry, QueueError};
use crate::cache::{CacheError, CacheTable, Database, SyncQueueRecord};

/// Queue kept as rows of the cache's `sync_queue` table.
#[derive(Debug, Clone)]
pub struct SqlQueue {
    db: Database,
}

impl SqlQueue {
    /// The database must already be initialized.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn record_to_entry(record: SyncQueueRecord) -> Result<QueueEntry, CacheError> {
    Ok(QueueEntry {
        id: EntryId(record.id),
        payload: record.payload_value()?,
        target: record.action,
        images: record.image_files,
    })
}

#[async_trait]
impl MutationQueue for SqlQueue {
    fn backend(&self) -> &'static str {
        "sql"
    }

    async fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let record = self
            .db
            .enqueue_with_images(&entry.target, &entry.payload, &entry.images)
            .await?;
        debug!(id = record.id, action = %record.action, "sync queue row added");

        Ok(QueueEntry {
            id: EntryId(record.id),
            target: record.action,
            payload: entry.payload,
            images: record.image_files,
        })
    }

    async fn list(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let records = self.db.list_queue().await?;
        let entries = records
            .into_iter()
            .map(record_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn remove(&self, id: EntryId) -> Result<bool, QueueError> {
        Ok(self.db.delete_queue_record(id.0).await?)
    }

    async fn clear(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let records = self.db.clear_queue().await?;
        let entries = records
            .into_iter()
            .map(record_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let count = self.db.count_rows(CacheTable::SyncQueue).await?;
        Ok(count as usize)
    }
}
