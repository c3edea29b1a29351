use anyhow::Result;
use clap::Parser;
use followup::cli::{
    handle_history_command, handle_run_command, handle_status_command, Cli, CliCommand,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("followup {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Status) => handle_status_command(),
        Some(CliCommand::History(args)) => handle_history_command(args),
        Some(CliCommand::Run) | None => handle_run_command().await,
    }
}
