//! ArcPatch CLI - author, manage and apply game patches

use std::path::PathBuf;

use anyhow::Context;
use arcpatch::config::EngineConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

use commands::Commands;

#[derive(Parser)]
#[command(name = "arcpatch")]
#[command(about = "ArcPatch: reversible patches for game archives", long_about = None)]
struct Cli {
    /// Show debug output (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/arcpatch/arcpatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match cli.config.or_else(EngineConfig::default_path) {
        Some(path) => EngineConfig::load_or_default(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    cli.command.execute(&config)
}
