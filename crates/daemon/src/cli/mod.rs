use std::path::PathBuf;

use clap::Parser;

pub mod op;
pub mod ops;

pub use op::{Op, OpContext};
use ops::{Init, Products, Purge, Replay, Session, Snapshot, Status, Submit, Watch};

crate::command_enum! {
    (Init, Init),
    (Status, Status),
    (Submit, Submit),
    (Sync, Replay),
    (Snapshot, Snapshot),
    (Products, Products),
    (Session, Session),
    (Purge, Purge),
    (Watch, Watch),
}

#[derive(Parser, Debug)]
#[command(name = "offsync", version, about = "Offline write-behind queue for API mutations")]
pub struct Args {
    /// State directory (default: ~/.offsync)
    #[arg(long, global = true, env = "OFFSYNC_DIR")]
    pub config_path: Option<PathBuf>,

    /// Log level for one-shot commands (watch uses the configured level)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}
