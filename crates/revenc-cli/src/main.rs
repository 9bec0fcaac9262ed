//! Service entry point - the composition root.
//!
//! This is the ONLY place where infrastructure is wired together:
//! environment resolution, store and broker setup, worker pools, and
//! the intake controller all meet here.

use clap::{Parser, Subcommand};
use tracing::error;

mod bootstrap;
mod env_config;

/// Exit code for invalid configuration.
const EXIT_CONFIG: i32 = 1;
/// Exit code when the job store is unreachable.
const EXIT_STORE: i32 = 2;
/// Exit code when the queue broker is unreachable.
const EXIT_BROKER: i32 = 3;

#[derive(Parser)]
#[command(name = "revencd", version, about = "Private video transcoding service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service: intake listener plus worker pools.
    Run,
    /// Resolve and validate configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match env_config::resolve() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            println!("configuration OK");
            println!("  database:  {}", config.database_path.display());
            println!("  cache dir: {}", config.cache_dir.display());
            println!("  io concurrency: {}", config.io_worker_concurrency);
            println!("  cpu slots: {}", config.cpu_worker_slots);
            println!(
                "  encode: crf {} preset {} audio {}",
                config.encode_crf, config.encode_preset_default, config.audio_bitrate
            );
        }
        Command::Run => {
            if let Err(code) = bootstrap::run(config).await {
                std::process::exit(code);
            }
        }
    }
}
