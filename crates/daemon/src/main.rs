use clap::Parser;
use owo_colors::OwoColorize;

use offsync_daemon::logging;
use offsync_daemon::state::AppState;

mod cli;

use cli::{Command, Op, OpContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let _log_guard = match &args.command {
        Command::Watch(_) => {
            let state = AppState::load(args.config_path.clone())?;
            std::fs::create_dir_all(&state.logs_path)?;
            Some(logging::init_service(&state.config.log_level, &state.logs_path))
        }
        _ => {
            logging::init_cli(&args.log_level);
            None
        }
    };

    let ctx = OpContext {
        config_path: args.config_path.clone(),
    };

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
