//! lapsync CLI - simulate, replay and inspect replicated stopwatches.
//!
//! Provides simulation, reducer replay, checkpoint inspection, and
//! configuration commands.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{config, inspect, replay, simulate};
use lapsync_core::telemetry::{init_logging, LogFormat};
use output::OutputFormat;

/// lapsync - peer-replicated stopwatches
#[derive(Parser)]
#[command(
    name = "lapsync",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "lapsync - peer-replicated stopwatches",
    long_about = "Simulate replica sessions, replay events and inspect saved checkpoints.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "LAPSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs to stderr at this level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LAPSYNC_LOG")]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run replicas over an in-memory hub and check they converge
    Simulate(simulate::SimulateArgs),

    /// Fold a base value and events through the stopwatch reducer
    Replay(replay::ReplayArgs),

    /// Show a saved checkpoint
    Inspect(inspect::InspectArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = run(cli).await;

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = lapsync_core::config::Config::load_from(cli.config.as_deref())?;

    if let Some(level) = cli.log_level {
        settings.telemetry.logging.level = level;
        settings.telemetry.logging.format = LogFormat::Compact;
        init_logging(&settings.telemetry.logging, &settings.telemetry.environment)?;
    }

    let format = cli.output;
    match cli.command {
        Commands::Simulate(args) => simulate::execute(args, &settings, format).await,
        Commands::Replay(args) => replay::execute(args, format),
        Commands::Inspect(args) => inspect::execute(args, &settings, format).await,
        Commands::Config(cmd) => config::execute(cmd, &settings, cli.config.as_deref(), format),
    }
}
