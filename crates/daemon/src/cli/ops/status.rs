use std::fmt;
use std::path::PathBuf;

use clap::Args;
use comfy_table::Table;
use owo_colors::OwoColorize;

use common::queue::QueueEntry;
use offsync_daemon::state::{AppState, QueueBackend};
use offsync_daemon::{ServiceError, Services, StateError};

#[derive(Args, Debug, Clone)]
pub struct Status {
    /// Probe the health URL instead of reporting offline
    #[arg(long)]
    pub probe: bool,
}

#[derive(Debug)]
pub struct StatusOutput {
    pub state_dir: PathBuf,
    pub queue_backend: QueueBackend,
    pub online: Option<bool>,
    pub logged_in_user: Option<i64>,
    pub products: i64,
    pub blobs: usize,
    pub pending: Vec<QueueEntry>,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", "State".bold())?;
        writeln!(f, "  {} {}", "directory:".dimmed(), self.state_dir.display())?;
        writeln!(f, "  {} {}", "queue:".dimmed(), self.queue_backend)?;
        let network = match self.online {
            Some(true) => "ONLINE".green().to_string(),
            Some(false) => "OFFLINE".red().to_string(),
            None => "not probed".dimmed().to_string(),
        };
        writeln!(f, "  {} {}", "network:".dimmed(), network)?;
        let session = match self.logged_in_user {
            Some(user_id) => format!("user {}", user_id),
            None => "none".to_string(),
        };
        writeln!(f, "  {} {}", "session:".dimmed(), session)?;
        writeln!(f, "  {} {}", "products:".dimmed(), self.products)?;
        writeln!(f, "  {} {}", "staged images:".dimmed(), self.blobs)?;
        writeln!(f)?;

        if self.pending.is_empty() {
            return write!(f, "{} nothing pending", "Queue:".bold());
        }

        writeln!(f, "{} {} pending", "Queue:".bold(), self.pending.len())?;
        let mut table = Table::new();
        table.set_header(vec!["ID", "TARGET", "IMAGES", "PAYLOAD"]);
        for entry in &self.pending {
            table.add_row(vec![
                entry.id.to_string(),
                entry.target.clone(),
                entry.images.len().to_string(),
                truncate(&entry.payload.to_string(), 48),
            ]);
        }
        write!(f, "{table}")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        let online = if self.probe {
            Some(services.check_connectivity().await?)
        } else {
            None
        };

        let session = services
            .cache
            .current_session()
            .await
            .map_err(ServiceError::from)?;

        Ok(StatusOutput {
            state_dir: state.state_dir,
            queue_backend: state.config.queue_backend,
            online,
            logged_in_user: session.map(|s| s.user_id),
            products: services.product_count().await?,
            blobs: services.blobs.list().await.map_err(ServiceError::from)?.len(),
            pending: services.engine.pending_items(),
        })
    }
}
