use std::fmt::Display;
use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use sqlx::Row;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{CacheError, Database};
use crate::blobs::BlobHandle;

/// One row of the SQL-backed mutation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueueRecord {
    pub id: i64,
    pub action: String,
    /// Serialized JSON payload, as stored
    pub payload: String,
    pub image_files: Vec<BlobHandle>,
    pub created_at: OffsetDateTime,
}

impl SyncQueueRecord {
    pub fn payload_value(&self) -> Result<Value, CacheError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Result of a [`Database::drain_queue`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainQueueReport {
    /// Rows replayed successfully and deleted
    pub replayed: usize,
    /// Rows still queued after the pass
    pub remaining: usize,
    /// The row that stopped the pass, if any
    pub halted_at: Option<i64>,
}

impl Database {
    /// Append a mutation to the queue.
    pub async fn enqueue<T: Serialize + ?Sized>(
        &self,
        action: &str,
        payload: &T,
    ) -> Result<SyncQueueRecord, CacheError> {
        self.enqueue_with_images(action, payload, &[]).await
    }

    /// Append a mutation that owns staged image blobs.
    pub async fn enqueue_with_images<T: Serialize + ?Sized>(
        &self,
        action: &str,
        payload: &T,
        image_files: &[BlobHandle],
    ) -> Result<SyncQueueRecord, CacheError> {
        self.ensure_ready()?;

        let payload = serde_json::to_string(payload)?;
        let image_files = serde_json::to_string(image_files)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (action, payload, image_files)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(action)
        .bind(&payload)
        .bind(&image_files)
        .execute(&**self)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, action, "queued mutation");

        self.get_queue_record(id)
            .await?
            .ok_or(CacheError::Sqlite(sqlx::Error::RowNotFound))
    }

    /// Get a single queue row by ID
    pub async fn get_queue_record(&self, id: i64) -> Result<Option<SyncQueueRecord>, CacheError> {
        self.ensure_ready()?;

        let row = sqlx::query(
            r#"
            SELECT id, action, payload, image_files, created_at
            FROM sync_queue
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&**self)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// All queued rows in replay order.
    pub async fn list_queue(&self) -> Result<Vec<SyncQueueRecord>, CacheError> {
        self.ensure_ready()?;

        let rows = sqlx::query(
            r#"
            SELECT id, action, payload, image_files, created_at
            FROM sync_queue
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Delete one queue row. Returns whether it existed.
    pub async fn delete_queue_record(&self, id: i64) -> Result<bool, CacheError> {
        self.ensure_ready()?;

        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&**self)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every queued row, returning what was discarded.
    pub async fn clear_queue(&self) -> Result<Vec<SyncQueueRecord>, CacheError> {
        self.ensure_ready()?;

        let mut tx = self.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, action, payload, image_files, created_at
            FROM sync_queue
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM sync_queue")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Replay queued rows in order until the queue is empty or one fails.
    ///
    /// `replay` receives each row's action and decoded payload. A row is
    /// deleted only after `replay` returns `Ok(true)`; `Ok(false)`, an error,
    /// or an undecodable payload stops the pass and leaves that row and
    /// everything after it queued.
    pub async fn drain_queue<F, Fut, E>(&self, mut replay: F) -> Result<DrainQueueReport, CacheError>
    where
        F: FnMut(String, Value) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        let queue = self.list_queue().await?;
        let total = queue.len();
        let mut report = DrainQueueReport::default();

        for record in queue {
            let payload = match record.payload_value() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(id = record.id, error = %e, "undecodable queue payload, stopping");
                    report.halted_at = Some(record.id);
                    break;
                }
            };

            match replay(record.action.clone(), payload).await {
                Ok(true) => {
                    self.delete_queue_record(record.id).await?;
                    report.replayed += 1;
                    debug!(id = record.id, action = %record.action, "replayed queued mutation");
                }
                Ok(false) => {
                    warn!(id = record.id, "replay rejected, stopping");
                    report.halted_at = Some(record.id);
                    break;
                }
                Err(e) => {
                    warn!(id = record.id, error = %e, "replay failed, stopping");
                    report.halted_at = Some(record.id);
                    break;
                }
            }
        }

        report.remaining = total - report.replayed;
        info!(
            replayed = report.replayed,
            remaining = report.remaining,
            "sync queue pass finished"
        );
        Ok(report)
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SyncQueueRecord, CacheError> {
    let image_files: String = row.try_get("image_files")?;
    Ok(SyncQueueRecord {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        payload: row.try_get("payload")?,
        image_files: serde_json::from_str(&image_files)?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let db = setup().await;
        for n in 0..5 {
            db.enqueue("create", &json!({ "n": n })).await.unwrap();
        }

        let queue = db.list_queue().await.unwrap();
        let ns: Vec<i64> = queue
            .iter()
            .map(|r| r.payload_value().unwrap()["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_enqueue_with_images_round_trips_handles() {
        let db = setup().await;
        let handles = vec![BlobHandle::new("a.jpg"), BlobHandle::new("b.png")];
        let record = db
            .enqueue_with_images("upload", &json!({}), &handles)
            .await
            .unwrap();
        assert_eq!(record.image_files, handles);
    }

    #[tokio::test]
    async fn test_drain_all_succeeding() {
        let db = setup().await;
        for n in 0..3 {
            db.enqueue("create", &json!({ "n": n })).await.unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let report = db
            .drain_queue(|action, payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push((action, payload["n"].as_i64().unwrap()));
                    Ok::<_, String>(true)
                }
            })
            .await
            .unwrap();

        assert_eq!(report.replayed, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.halted_at, None);
        assert!(db.list_queue().await.unwrap().is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("create".to_string(), 0),
                ("create".to_string(), 1),
                ("create".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_rejection() {
        let db = setup().await;
        let mut ids = Vec::new();
        for n in 0..4 {
            ids.push(db.enqueue("create", &json!({ "n": n })).await.unwrap().id);
        }

        let calls = Arc::new(Mutex::new(0));
        let report = db
            .drain_queue(|_, payload| {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Ok::<_, String>(payload["n"].as_i64() != Some(1))
                }
            })
            .await
            .unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 3);
        assert_eq!(report.halted_at, Some(ids[1]));
        // Nothing after the rejected row was attempted
        assert_eq!(*calls.lock().unwrap(), 2);

        let remaining: Vec<i64> = db.list_queue().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(remaining, ids[1..].to_vec());
    }

    #[tokio::test]
    async fn test_drain_stops_on_error() {
        let db = setup().await;
        db.enqueue("create", &json!({ "n": 0 })).await.unwrap();
        db.enqueue("create", &json!({ "n": 1 })).await.unwrap();

        let report = db
            .drain_queue(|_, _| async { Err::<bool, _>("backend unreachable") })
            .await
            .unwrap();

        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(db.list_queue().await.unwrap().len(), 2);
    }
}
