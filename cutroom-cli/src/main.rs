//! Cutroom CLI - Command-line interface
//!
//! Runs the export API server, renders timeline files directly, and checks
//! timelines or media files without rendering.

mod commands;

use clap::Parser;
use cutroom_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "cutroom")]
#[command(about = "Render multi-track editing timelines to MP4")]
struct Cli {
    /// Console log verbosity; the log file always records everything
    #[arg(long, value_enum, global = true, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_file = init_tracing(cli.log_level.as_tracing_level(), None)?;
    tracing::debug!("Writing full trace to {}", log_file.display());

    commands::handle_command(cli.command).await
}
