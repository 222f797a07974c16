//! Relational local cache.
//!
//! Holds the current auth session, the mirrored profile and product rows, and
//! the SQL-backed mutation queue. Multi-row writes (snapshot apply, session
//! save, purge) run in a single transaction and roll back on any failure.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

mod error;
pub mod models;
mod sync_queue;

pub use error::CacheError;
pub use models::{AuthSession, Product, Profile, ServerSnapshot, SnapshotStats};
pub use sync_queue::{DrainQueueReport, SyncQueueRecord};

/// Connection pool for the local cache plus its readiness flag.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    ready: Arc<AtomicBool>,
}

impl std::ops::Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Database {
    /// Open (or create) a file-backed cache.
    ///
    /// The schema is not created until [`Database::initialize`] is called.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Setup(format!("failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("cache database opened at {:?}", path);
        Ok(Self::from_pool(pool))
    }

    /// Open an in-memory cache. Useful for tests.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        debug!("cache database opened in-memory");
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Create the schema if needed and mark the cache ready.
    ///
    /// Safe to call any number of times; only the first call does work.
    pub async fn initialize(&self) -> Result<(), CacheError> {
        if self.is_ready() {
            return Ok(());
        }

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS auth_session (
                id INTEGER PRIMARY KEY,
                token TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                is_logged_in INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                price REAL NOT NULL,
                category TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                payload TEXT NOT NULL,
                image_files TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_queue_created_at
            ON sync_queue(created_at, id)
            "#,
        ];

        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.ready.store(true, Ordering::Release);
        info!("cache schema ready");
        Ok(())
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), CacheError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CacheError::NotInitialized)
        }
    }

    /// Delete every row in every table, atomically. Used on logout.
    pub async fn purge_all(&self) -> Result<(), CacheError> {
        self.ensure_ready()?;

        let mut tx = self.pool.begin().await?;
        let mut outcome = Ok(());
        for table in ["auth_session", "profile", "products", "sync_queue"] {
            if let Err(e) = sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
            {
                outcome = Err(e);
                break;
            }
        }

        match outcome {
            Ok(()) => {
                tx.commit().await?;
                info!("cache purged");
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                warn!(error = %e, "cache purge rolled back");
                Err(CacheError::TransactionAborted(e.to_string()))
            }
        }
    }

    /// Row count for one of the cache tables.
    pub async fn count_rows(&self, table: CacheTable) -> Result<i64, CacheError> {
        self.ensure_ready()?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", table.as_str()))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Close the pool. Further operations will fail.
    pub async fn close(&self) {
        self.ready.store(false, Ordering::Release);
        self.pool.close().await;
    }
}

/// The tables owned by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    AuthSession,
    Profile,
    Products,
    SyncQueue,
}

impl CacheTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTable::AuthSession => "auth_session",
            CacheTable::Profile => "profile",
            CacheTable::Products => "products",
            CacheTable::SyncQueue => "sync_queue",
        }
    }
}
