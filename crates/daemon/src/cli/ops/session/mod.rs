use clap::Args;

pub mod save;
pub mod show;

use crate::cli::op::Op;

crate::command_enum! {
    (Show, show::Show),
    (Save, save::Save),
}

pub type SessionCommand = Command;

/// Inspect or replace the cached auth session
#[derive(Args, Debug, Clone)]
pub struct Session {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[async_trait::async_trait]
impl Op for Session {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
