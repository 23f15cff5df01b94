mod app_paths;
mod auth;
mod auto_start;
mod cli;
mod commands;
mod config;
mod error;
mod events;
mod logging;
mod notifications;
mod profiles;
mod refresh;
mod render;
mod secrets;
mod statusline;
#[cfg(test)]
mod testing;
mod usage;

use anyhow::Result;
use app_paths::AppPaths;
use clap::Parser;
use cli::{Cli, Command};
use commands::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.home {
        Some(home) => AppPaths::new(home),
        None => AppPaths::from_env()?,
    };

    // Only the long-running engine keeps a log file.
    let log_file = matches!(cli.command, Command::Run { .. }).then(|| paths.log_path());
    logging::init_tracing(cli.verbose, log_file.as_deref())?;

    let ctx = AppContext::open(paths)?;
    match cli.command {
        Command::Run { appearance } => commands::run_engine(ctx, appearance).await,
        command => {
            let mut stdout = std::io::stdout();
            commands::execute(&ctx, command, &mut stdout).await
        }
    }
}
