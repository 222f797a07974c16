use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use url::Url;

use offsync_daemon::state::{AppConfig, AppState, QueueBackend};
use offsync_daemon::{ServiceError, Services};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Base URL queued mutations are delivered against
    #[arg(long, default_value = "http://localhost:3000/api/")]
    pub api_url: Url,

    /// URL probed to decide whether the backend is reachable
    #[arg(long)]
    pub health_url: Option<Url>,

    /// Where the mutation queue lives
    #[arg(long, value_enum, default_value_t = QueueBackend::Kv)]
    pub queue_backend: QueueBackend,

    /// Seconds before a single delivery counts as failed
    #[arg(long, default_value = "30")]
    pub delivery_timeout: u64,

    /// Seconds between connectivity probes while watching
    #[arg(long, default_value = "15")]
    pub poll_interval: u64,

    /// Seconds between periodic drains while watching (0 disables)
    #[arg(long, default_value = "300")]
    pub sync_interval: u64,

    /// Default log level for the watch service
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug)]
pub struct InitOutput {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub storage_path: PathBuf,
    pub blobs_path: PathBuf,
    pub api_url: Url,
    pub queue_backend: QueueBackend,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} offsync at {}",
            "Initialized".green().bold(),
            self.state_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Cache:".dimmed(), self.cache_path.display())?;
        writeln!(f, "  {} {}", "Storage:".dimmed(), self.storage_path.display())?;
        writeln!(f, "  {} {}", "Blobs:".dimmed(), self.blobs_path.display())?;
        writeln!(f, "  {} {}", "API:".dimmed(), self.api_url)?;
        write!(f, "  {} {}", "Queue:".dimmed(), self.queue_backend)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] offsync_daemon::StateError),

    #[error("failed to create stores: {0}")]
    Services(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            api_url: self.api_url.clone(),
            health_url: self.health_url.clone(),
            queue_backend: self.queue_backend,
            delivery_timeout_secs: self.delivery_timeout,
            poll_interval_secs: self.poll_interval,
            sync_interval_secs: self.sync_interval,
            log_level: self.log_level.clone(),
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        // Create both databases and the cache schema up front
        Services::open(&state).await?;

        Ok(InitOutput {
            state_dir: state.state_dir,
            config_path: state.config_path,
            cache_path: state.cache_path,
            storage_path: state.storage_path,
            blobs_path: state.blobs_path,
            api_url: state.config.api_url,
            queue_backend: state.config.queue_backend,
        })
    }
}
