use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::cache::{AuthSession, CacheError};
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

/// Show the current session
#[derive(Args, Debug, Clone)]
pub struct Show;

#[derive(Debug)]
pub struct ShowOutput {
    pub session: Option<AuthSession>,
}

impl fmt::Display for ShowOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => {
                writeln!(f, "{} user {}", "Logged in".green().bold(), session.user_id)?;
                write!(f, "  {} {}", "token:".dimmed(), mask_token(&session.token))
            }
            None => write!(f, "{}", "Not logged in".dimmed()),
        }
    }
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShowError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Show {
    type Error = ShowError;
    type Output = ShowOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;

        Ok(ShowOutput {
            session: services.cache.current_session().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abc"), "****");
        assert_eq!(mask_token("abcdefgh"), "abcd****");
    }
}
