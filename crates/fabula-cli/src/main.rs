use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fabula::MemoryManager;
use fabula::config::Config;
use fabula::storage::FileBlobStore;
use fabula_cli::commands::{ConsolidateCommand, RecordCommand, StatsCommand};
use fabula_cli::error::CliResult;
use fabula_cli::output::OutputFormat;

#[derive(Parser)]
#[command(name = "fabula")]
#[command(about = "Fabula CLI - Management tool for the tiered memory engine")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Record management commands")]
    Record(RecordCommand),

    #[clap(about = "Show tier and guard statistics")]
    Stats(StatsCommand),

    #[clap(about = "Trigger a consolidation run")]
    Consolidate(ConsolidateCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }

    let blobs = Arc::new(FileBlobStore::new(config.storage.data_dir.clone())?);
    let manager = MemoryManager::new(blobs, config);
    manager.load().await?;

    let result = match &cli.command {
        Command::Record(cmd) => cmd.execute(&manager, format).await,
        Command::Stats(cmd) => cmd.execute(&manager, format).await,
        Command::Consolidate(cmd) => cmd.execute(&manager, format).await,
    };

    manager.shutdown().await?;
    result
}
