use std::fmt;
use std::time::Duration;

use clap::Args;
use owo_colors::OwoColorize;

use common::engine::EngineHandle;
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// Run in the foreground: probe connectivity and drain on reconnect
#[derive(Args, Debug, Clone)]
pub struct Watch {
    /// Skip health probing and treat the backend as always reachable
    #[arg(long)]
    pub assume_online: bool,
}

#[derive(Debug)]
pub struct WatchOutput {
    pub pending: usize,
}

impl fmt::Display for WatchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} mutation(s) still pending",
            "Stopped.".bold(),
            self.pending
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Watch {
    type Error = WatchError;
    type Output = WatchOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        let (handle, worker) =
            EngineHandle::spawn(services.engine.clone(), state.config.sync_interval());
        let reconnect = handle.watch_connectivity();

        let probe = match services.probe()? {
            Some(probe) if !self.assume_online => {
                tracing::info!(
                    interval_secs = state.config.poll_interval().as_secs(),
                    "probing connectivity"
                );
                Some(
                    services
                        .connectivity
                        .spawn_probe(probe, state.config.poll_interval()),
                )
            }
            _ => {
                services.connectivity.set_online(true);
                None
            }
        };

        tracing::info!(
            api = %state.config.api_url,
            backend = %state.config.queue_backend,
            pending = handle.pending_items().len(),
            "watching, press ctrl-c to stop"
        );

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");

        drop(probe);
        reconnect.unsubscribe();
        let engine = handle.engine().clone();
        drop(handle);

        // Let an in-flight drain finish before exiting
        let grace = state.config.delivery_timeout() + Duration::from_secs(5);
        if tokio::time::timeout(grace, worker).await.is_err() {
            tracing::warn!("engine worker did not stop in time");
        }

        Ok(WatchOutput {
            pending: engine.pending_items().len(),
        })
    }
}
