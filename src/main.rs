use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

use tg_relaybot::config;
use tg_relaybot::db;
use tg_relaybot::handlers::{self, BotState};
use tg_relaybot::menu::Dialogues;
use tg_relaybot::ops::Console;
use tg_relaybot::relay::{Relay, RelaySettings};
use tg_relaybot::scheduler::Scheduler;
use tg_relaybot::telegram::TelegramPlatform;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = Arc::new(config::load(Some(&args.config))?);
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let platform = Arc::new(TelegramPlatform::new(bot.clone(), pool.clone()));
    let relay = Arc::new(Relay::new(
        platform,
        pool.clone(),
        RelaySettings::from_config(&cfg),
    ));
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        relay.clone(),
        cfg.scheduler.misfire_grace(),
    ));
    let restored = scheduler.restore().await?;
    info!(restored, "scheduler ready");

    let state = Arc::new(BotState {
        cfg: cfg.clone(),
        pool: pool.clone(),
        console: Arc::new(Console::new(pool, relay, scheduler.clone())),
        dialogues: Dialogues::default(),
    });

    handlers::run(bot, state).await?;
    scheduler.shutdown();
    info!("stopped");
    Ok(())
}
