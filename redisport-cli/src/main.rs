use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use redisport::StatusStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "redisport")]
#[command(about = "Streaming export/import for Redis-compatible stores")]
#[command(version)]
struct Cli {
    /// Store connection URL
    #[arg(long, global = true, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    url: String,

    /// Override the status state file location
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export keys matching a pattern to a replay file
    Export {
        /// Glob pattern for keys to export
        #[arg(long, default_value = "*")]
        pattern: String,

        /// Folder for the export file
        #[arg(long, default_value = ".")]
        folder: PathBuf,

        /// Use one blocking KEYS call instead of incremental SCAN.
        /// Faster on small datasets, blocks the store on large ones.
        #[arg(long)]
        full_scan: bool,
    },

    /// Replay an export file against the store
    Import {
        /// Path to the replay file
        #[arg(long)]
        file: PathBuf,
    },

    /// Show the active or last operation
    Status,

    /// Cancel the running operation after its current batch
    Cancel,

    /// Clear a finished operation's status
    Reset {
        /// Clear even a running status (for sessions that died)
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let status = Arc::new(match &cli.state_file {
        Some(path) => StatusStore::open(path),
        None => StatusStore::open_default(),
    });

    match cli.command {
        Commands::Export {
            pattern,
            folder,
            full_scan,
        } => commands::run_export(&cli.url, status, pattern, folder, full_scan).await,
        Commands::Import { file } => commands::run_import(&cli.url, status, file).await,
        Commands::Status => commands::run_status(status),
        Commands::Cancel => commands::run_cancel(status),
        Commands::Reset { force } => commands::run_reset(status, force),
    }
}
