use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::cache::{AuthSession, CacheError};
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// Replace the current session
#[derive(Args, Debug, Clone)]
pub struct Save {
    #[arg(long)]
    pub user_id: i64,

    #[arg(long, env = "OFFSYNC_TOKEN")]
    pub token: String,
}

#[derive(Debug)]
pub struct SaveOutput {
    pub session: AuthSession,
}

impl fmt::Display for SaveOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} session for user {}",
            "Saved".green().bold(),
            self.session.user_id
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Save {
    type Error = SaveError;
    type Output = SaveOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        let session = services.cache.save_session(self.user_id, &self.token).await?;
        Ok(SaveOutput { session })
    }
}
