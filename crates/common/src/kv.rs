//! Durable key-value storage.
//!
//! Values are stored as JSON text in their own SQLite file, separate from the
//! relational cache. A read-modify-write via [`KvStore::update`] runs inside
//! an immediate SQLite transaction, so it never loses a concurrent update even
//! when several processes open the same file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long a writer waits for another process to release the database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum KvError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("failed to (de)serialize value for key '{key}': {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to prepare storage directory: {0}")]
    Setup(String),
}

/// Persisted mapping from string keys to JSON values.
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl KvStore {
    /// Open (or create) a file-backed store.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KvError::Setup(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;

        info!("key-value store initialized at {:?}", path);
        Ok(store)
    }

    /// Create a store that only lives as long as the process.
    pub async fn in_memory() -> Result<Self, KvError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection that never expires; the data lives in it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;

        debug!("key-value store initialized in-memory");
        Ok(store)
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn run_migrations(&self) -> Result<(), KvError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read and deserialize a value. Missing keys yield `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        let mut conn = self.pool.acquire().await?;
        read_value(&mut conn, key).await
    }

    /// Serialize and store a value, replacing any previous one.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        write_value(&mut conn, key, value).await
    }

    /// Remove a key. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, KvError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every key.
    pub async fn clear(&self) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM kv_store")
            .execute(&self.pool)
            .await?;
        info!("key-value store cleared");
        Ok(())
    }

    /// List all stored keys in lexical order.
    pub async fn keys(&self) -> Result<Vec<String>, KvError> {
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("key")).collect())
    }

    /// Read-modify-write a value in one immediate transaction.
    ///
    /// The database write lock is taken before the read, so writers in other
    /// processes wait instead of interleaving. A missing key starts from
    /// `T::default()`. The closure's return value is passed through to the
    /// caller after the commit succeeds.
    pub async fn update<T, R, F>(&self, key: &str, f: F) -> Result<R, KvError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let outcome = async {
            let mut value: T = read_value(&mut conn, key).await?.unwrap_or_default();
            let result = f(&mut value);
            write_value(&mut conn, key, &value).await?;
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok::<R, KvError>(result)
        }
        .await;

        if outcome.is_err() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                // Never hand a connection with an open transaction back to the pool
                warn!(key, error = %e, "rollback failed, discarding connection");
                drop(conn.detach());
            }
        }
        outcome
    }

    /// Close the pool. Clones of this store are closed as well.
    pub async fn close(&self) {
        self.pool.close().await;
    }

}

async fn read_value<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<T>, KvError> {
    let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let raw: String = row.get("value");
            let value = serde_json::from_str(&raw).map_err(|source| KvError::Serde {
                key: key.to_string(),
                source,
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

async fn write_value<T: Serialize + ?Sized>(
    conn: &mut SqliteConnection,
    key: &str,
    value: &T,
) -> Result<(), KvError> {
    let raw = serde_json::to_string(value).map_err(|source| KvError::Serde {
        key: key.to_string(),
        source,
    })?;

    sqlx::query(
        r#"
        INSERT INTO kv_store (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(raw)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[tokio::test]
    async fn test_get_set_remove() {
        let kv = KvStore::in_memory().await.unwrap();

        assert_eq!(kv.get::<Counter>("counter").await.unwrap(), None);

        kv.set("counter", &Counter { hits: 3 }).await.unwrap();
        assert_eq!(
            kv.get::<Counter>("counter").await.unwrap(),
            Some(Counter { hits: 3 })
        );

        kv.set("counter", &Counter { hits: 4 }).await.unwrap();
        assert_eq!(
            kv.get::<Counter>("counter").await.unwrap(),
            Some(Counter { hits: 4 })
        );

        assert!(kv.remove("counter").await.unwrap());
        assert!(!kv.remove("counter").await.unwrap());
        assert_eq!(kv.get::<Counter>("counter").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let kv = KvStore::in_memory().await.unwrap();
        kv.set("a", &1).await.unwrap();
        kv.set("b", &2).await.unwrap();
        assert_eq!(kv.keys().await.unwrap(), vec!["a", "b"]);

        kv.clear().await.unwrap();
        assert!(kv.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let kv = KvStore::in_memory().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let kv = kv.clone();
            tasks.push(tokio::spawn(async move {
                kv.update("counter", |c: &mut Counter| c.hits += 1)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let counter: Counter = kv.get("counter").await.unwrap().unwrap();
        assert_eq!(counter.hits, 20);
    }

    #[tokio::test]
    async fn test_updates_from_two_stores_on_one_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storage.db");
        let first = KvStore::new(&path).await.unwrap();
        let second = KvStore::new(&path).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..40 {
            let kv = if i % 2 == 0 {
                first.clone()
            } else {
                second.clone()
            };
            tasks.push(tokio::spawn(async move {
                kv.update("counter", |c: &mut Counter| c.hits += 1)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let counter: Counter = first.get("counter").await.unwrap().unwrap();
        assert_eq!(counter.hits, 40);
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let kv = KvStore::in_memory().await.unwrap();
        kv.set("value", "not a counter").await.unwrap();

        let err = kv
            .update("value", |c: &mut Counter| c.hits += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::Serde { .. }));

        // The connection is usable again and the value untouched
        let value: Option<String> = kv.get("value").await.unwrap();
        assert_eq!(value.as_deref(), Some("not a counter"));
        kv.update("counter", |c: &mut Counter| c.hits += 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_type_mismatch_is_serde_error() {
        let kv = KvStore::in_memory().await.unwrap();
        kv.set("value", "not a counter").await.unwrap();
        let err = kv.get::<Counter>("value").await.unwrap_err();
        assert!(matches!(err, KvError::Serde { .. }));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storage.db");

        {
            let kv = KvStore::new(&path).await.unwrap();
            kv.set("greeting", "hello").await.unwrap();
        }

        let kv = KvStore::new(&path).await.unwrap();
        let value: Option<String> = kv.get("greeting").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }
}
