use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::{Product, Profile};
use crate::cache::{CacheError, Database};

/// Reference data pushed down from the server in one piece.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub products: Option<Vec<Product>>,
}

impl ServerSnapshot {
    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// What an applied snapshot wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub profile_written: bool,
    pub products_written: usize,
}

impl Database {
    /// Upsert the snapshot's profile and products in one transaction.
    ///
    /// Any failure, including a product that fails validation, rolls back
    /// the whole snapshot and leaves previously cached rows untouched.
    pub async fn apply_server_snapshot(
        &self,
        snapshot: &ServerSnapshot,
    ) -> Result<SnapshotStats, CacheError> {
        self.ensure_ready()?;

        let mut tx = self.begin().await?;
        match write_snapshot(&mut tx, snapshot).await {
            Ok(stats) => {
                tx.commit().await?;
                info!(
                    profile = stats.profile_written,
                    products = stats.products_written,
                    "server snapshot applied"
                );
                Ok(stats)
            }
            Err(e) => {
                tx.rollback().await?;
                warn!(error = %e, "server snapshot rolled back");
                Err(CacheError::TransactionAborted(e.to_string()))
            }
        }
    }
}

async fn write_snapshot(
    conn: &mut SqliteConnection,
    snapshot: &ServerSnapshot,
) -> Result<SnapshotStats, CacheError> {
    let mut stats = SnapshotStats::default();

    if let Some(profile) = &snapshot.profile {
        profile.upsert(conn).await?;
        stats.profile_written = true;
    }

    for product in snapshot.products.iter().flatten() {
        product.upsert(conn).await?;
        stats.products_written += 1;
    }

    Ok(stats)
}
