use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::engine::DrainOutcome;
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// Replay the queue now
#[derive(Args, Debug, Clone)]
pub struct Replay {
    /// Skip the health probe and assume the backend is reachable
    #[arg(long)]
    pub assume_online: bool,
}

#[derive(Debug)]
pub struct SyncOutput {
    pub outcome: DrainOutcome,
}

impl fmt::Display for SyncOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            DrainOutcome::Skipped(reason) => {
                write!(f, "{} {}", "Skipped:".yellow().bold(), reason)
            }
            DrainOutcome::Completed(report) => {
                writeln!(
                    f,
                    "{} {} delivered, {} remaining",
                    "Synced:".green().bold(),
                    report.delivered,
                    report.remaining
                )?;
                if let Some(id) = report.halted_at {
                    write!(
                        f,
                        "  {} stopped at {}: {}",
                        "halted".red(),
                        id,
                        report.error.as_deref().unwrap_or("unknown error")
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Replay {
    type Error = SyncError;
    type Output = SyncOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        if self.assume_online {
            services.connectivity.set_online(true);
        } else {
            services.check_connectivity().await?;
        }

        let outcome = services
            .engine
            .drain()
            .await
            .map_err(ServiceError::from)?;
        Ok(SyncOutput { outcome })
    }
}
