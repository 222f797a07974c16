use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use offsync_daemon::state::AppState;
use offsync_daemon::{LogoutReport, ServiceError, Services, StateError};

/// Log out: drop the session, cached data, queued mutations and staged images
#[derive(Args, Debug, Clone)]
pub struct Purge;

#[derive(Debug)]
pub struct PurgeOutput {
    pub report: LogoutReport,
}

impl fmt::Display for PurgeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discarded {} queued mutation(s)",
            "Purged".green().bold(),
            self.report.discarded_items
        )?;
        if self.report.remaining_blobs > 0 {
            write!(
                f,
                "\n  {} {} unreferenced image(s) left in the blob store",
                "note:".yellow(),
                self.report.remaining_blobs
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Purge {
    type Error = PurgeError;
    type Output = PurgeOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        let report = services.logout().await?;
        Ok(PurgeOutput { report })
    }
}
