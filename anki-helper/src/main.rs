//! anki-helper - Anki collection automation
//!
//! Loads a configuration file and runs its actions against a running Anki
//! instance with the AnkiConnect add-on.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anki_helper_common::config::{find_config_file, load_config_file, CONFIG_PATH_ENV};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Command-line arguments for anki-helper
#[derive(Parser, Debug)]
#[command(name = "anki-helper")]
#[command(about = "Batch note processing, text-to-speech and deck organization for Anki")]
#[command(version, long_version = LONG_VERSION)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Print the loaded configuration as JSON
    #[arg(long)]
    print_config: bool,

    /// Exit after loading (and optionally printing) the configuration
    #[arg(long)]
    noop: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anki_helper=info,anki_helper_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => info!("Completed."),
        Err(e) => {
            error!("Failed with error: {:#}", e);
            error!("Exit with status 1");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = find_config_file(args.config.as_deref())?;

    if args.print_config || args.noop {
        let loaded = load_config_file(&config_path)?;
        if args.print_config {
            let json = serde_json::to_string_pretty(&loaded.file)
                .context("failed to dump configuration")?;
            println!("{}", json);
        }
        // Validates run list entries as well
        anki_helper::load_run_list(&config_path)
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
        if args.noop {
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    // PipelineError already names the failing stage and its cause
    anki_helper::run_config_file(&config_path, cancel)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupted, cancelling running scripts");
            cancel.cancel();
        }
        Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
    }
}
