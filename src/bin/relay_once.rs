use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{info, warn};

use tg_relaybot::config;
use tg_relaybot::db;
use tg_relaybot::handlers::describe_outcome;
use tg_relaybot::ops::{Console, ALL_LISTS};
use tg_relaybot::relay::{Relay, RelayOutcome, RelaySettings};
use tg_relaybot::scheduler::Scheduler;
use tg_relaybot::telegram::TelegramPlatform;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Relay the newest recorded source message once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Destination list name, or ALL for every list
    #[arg(long, default_value = ALL_LISTS)]
    list: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let platform = Arc::new(TelegramPlatform::new(bot, pool.clone()));
    let relay = Arc::new(Relay::new(
        platform,
        pool.clone(),
        RelaySettings::from_config(&cfg),
    ));
    // Jobs are not restored; this run only relays once.
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        relay.clone(),
        cfg.scheduler.misfire_grace(),
    ));
    let console = Console::new(pool, relay, scheduler);

    info!(list = %args.list, "relaying once");
    let outcome = console.send_now(&args.list).await?;
    if let RelayOutcome::Delivered(report) = outcome {
        if report.failed > 0 {
            warn!(failed = report.failed, "some destinations failed");
        }
    }
    println!("{}", describe_outcome(outcome));
    Ok(())
}
