use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use dog_chunks::{ChunkManager, ChunkResult, ChunkSettings, ClearReport, Disks, LocalStore};

/// Environment prefix for settings, e.g. `DOG_CHUNKS__CHUNKS__FOLDER`
const ENV_PREFIX: &str = "DOG_CHUNKS";

#[derive(Parser)]
#[command(name = "dog-chunks")]
#[command(about = "Maintenance commands for chunked upload sessions")]
#[command(author, version, long_about = None)]
struct Cli {
    /// Directory the local disk is rooted at
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete one upload session, or every session when no folder is given
    Clear {
        /// Session folder to delete
        folder: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Clear { folder } => match clear(cli.root, folder.as_deref()).await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    println!("{}", outcome);
                }
                if report.is_success() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(err) => {
                error!(error = %err, "clear failed");
                eprintln!("error: {}", err);
                ExitCode::FAILURE
            }
        },
    }
}

async fn clear(root: PathBuf, folder: Option<&str>) -> ChunkResult<ClearReport> {
    let settings = ChunkSettings::from_env(ENV_PREFIX)?;
    let manager = ChunkManager::new(settings, Disks::new(LocalStore::new(root)))?;
    manager.clear_chunks(folder).await
}
