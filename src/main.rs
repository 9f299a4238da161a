use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::watch;
use tracing::{error, info, warn};

use hydrus_telegram_bot::caption::HttpLinkChecker;
use hydrus_telegram_bot::commands;
use hydrus_telegram_bot::config;
use hydrus_telegram_bot::engine::Engine;
use hydrus_telegram_bot::hydrus::HydrusClient;
use hydrus_telegram_bot::media;
use hydrus_telegram_bot::scheduler::Scheduler;
use hydrus_telegram_bot::telegram::TelegramChannel;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(config::env_filter(cfg.log_filter()))
        .with_target(false)
        .compact()
        .init();

    cfg.ensure_dirs()?;
    if let Err(err) = media::ensure_ffmpeg_available().await {
        warn!(?err, "ffmpeg not found; video items will fail to publish");
    }

    let archive = Arc::new(HydrusClient::from_config(&cfg)?);
    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let channel = Arc::new(TelegramChannel::new(bot.clone(), cfg.telegram.channel));
    let checker = Arc::new(HttpLinkChecker::new()?);
    let mut engine = Engine::from_config(&cfg, archive, channel, checker);

    if !cfg.telegram.admins.is_empty() {
        tokio::spawn(commands::run(
            bot,
            cfg.telegram.admins.clone(),
            cfg.queue_file(),
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested; finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => error!(?err, "failed to listen for ctrl-c"),
        }
    });

    info!(
        delay_minutes = cfg.app.delay_minutes,
        timezone = cfg.app.timezone,
        queue = %engine.queue().file().display(),
        "starting publisher"
    );
    Scheduler::new(cfg.app.timezone, cfg.app.delay_minutes)
        .run(&mut engine, shutdown_rx)
        .await;

    info!("Exiting...");
    Ok(())
}
