use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::cache::{CacheError, ServerSnapshot, SnapshotStats};
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// Apply a server snapshot (profile and products) to the local cache
#[derive(Args, Debug, Clone)]
pub struct Snapshot {
    /// JSON file with optional `profile` and `products` fields, `-` for stdin
    pub file: PathBuf,
}

#[derive(Debug)]
pub struct SnapshotOutput {
    pub stats: SnapshotStats,
}

impl fmt::Display for SnapshotOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} profile: {}, products: {}",
            "Applied".green().bold(),
            if self.stats.profile_written { "updated" } else { "unchanged" },
            self.stats.products_written
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("snapshot rejected: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Snapshot {
    type Error = SnapshotError;
    type Output = SnapshotOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let raw = if self.file.as_os_str() == "-" {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        } else {
            std::fs::read_to_string(&self.file)?
        };
        let snapshot = ServerSnapshot::from_json(&raw)?;

        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;
        let stats = services.cache.apply_server_snapshot(&snapshot).await?;

        Ok(SnapshotOutput { stats })
    }
}
