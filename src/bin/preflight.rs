use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use hydrus_telegram_bot::config;
use hydrus_telegram_bot::hydrus::{ArchiveClient, HydrusClient};
use hydrus_telegram_bot::media;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Check configuration, ffmpeg and Hydrus access, then exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(config::env_filter("info"))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut failures = 0;

    let cfg = match config::load(Some(&args.config)) {
        Ok(cfg) => {
            info!(path = %args.config.display(), "config ok");
            Some(cfg)
        }
        Err(err) => {
            error!(%err, path = %args.config.display(), "config invalid");
            failures += 1;
            None
        }
    };

    match media::ensure_ffmpeg_available().await {
        Ok(()) => info!("ffmpeg ok"),
        Err(err) => {
            error!(%err, "ffmpeg check failed");
            failures += 1;
        }
    }

    if let Some(cfg) = &cfg {
        let ok = match HydrusClient::from_config(cfg) {
            Ok(client) => client.check_permissions().await.unwrap_or(false),
            Err(err) => {
                error!(?err, "failed to build Hydrus client");
                false
            }
        };
        if ok {
            info!(api_url = %cfg.hydrus.api_url, "hydrus ok");
        } else {
            error!(api_url = %cfg.hydrus.api_url, "hydrus check failed");
            failures += 1;
        }
    }

    if failures > 0 {
        error!(failures, "preflight failed");
        return Ok(ExitCode::FAILURE);
    }
    info!("preflight passed");
    Ok(ExitCode::SUCCESS)
}
