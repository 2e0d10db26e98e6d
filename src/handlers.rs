//! Update dispatch. Operator private chats go through one router; every other
//! message or channel post is recorded as potential source material.
use std::sync::Arc;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{JobRecord, Pool, StoreError};
use crate::menu::{DialogueState, Dialogues, Intent, Menu, HELP_TEXT};
use crate::ops::{AddOutcome, Console, OpsError, ALL_LISTS};
use crate::relay::RelayOutcome;
use crate::scheduler::JobError;
use crate::telegram;

pub struct BotState {
    pub cfg: Arc<Config>,
    pub pool: Pool,
    pub console: Arc<Console>,
    pub dialogues: Dialogues,
}

/// Text and keyboard sent back to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub menu: Menu,
}

impl Reply {
    fn new(text: impl Into<String>, menu: Menu) -> Self {
        Self {
            text: text.into(),
            menu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Reply(Reply),
    /// Relay to the selection in the background, then report.
    Relay { selection: String },
}

pub async fn run(bot: Bot, state: Arc<BotState>) -> anyhow::Result<()> {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_channel_post));

    info!("starting telegram dispatcher");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

async fn handle_channel_post(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    record(&state, &msg).await;
    Ok(())
}

#[instrument(skip_all, fields(chat_id = msg.chat.id.0))]
async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        record(&state, &msg).await;
        return Ok(());
    }

    let Some(operator) = msg
        .from()
        .map(|user| user.id.0 as i64)
        .filter(|id| state.cfg.is_operator(*id))
    else {
        let _ = bot
            .send_message(msg.chat.id, "Unauthorized. Contact the bot owner for access.")
            .await;
        return Ok(());
    };

    let Some(text) = msg.text() else {
        let _ = bot
            .send_message(msg.chat.id, "Send text or use the menu below.")
            .reply_markup(Menu::Main.keyboard())
            .await;
        return Ok(());
    };

    match route(&state, operator, Intent::parse(text)).await {
        Routed::Reply(reply) => {
            bot.send_message(msg.chat.id, reply.text)
                .reply_markup(reply.menu.keyboard())
                .await?;
        }
        Routed::Relay { selection } => {
            bot.send_message(
                msg.chat.id,
                format!("⏳ Relaying the newest source message to {selection}…"),
            )
            .reply_markup(Menu::Main.keyboard())
            .await?;
            let console = Arc::clone(&state.console);
            let chat = msg.chat.id;
            tokio::spawn(async move {
                let text = match console.send_now(&selection).await {
                    Ok(outcome) => describe_outcome(outcome),
                    Err(err) => {
                        warn!(%selection, %err, "send now failed");
                        format!("⚠️ Relay failed: {err}")
                    }
                };
                if let Err(err) = bot.send_message(chat, text).await {
                    warn!(%err, "failed to report relay result");
                }
            });
        }
    }
    Ok(())
}

async fn record(state: &BotState, msg: &Message) {
    if let Err(err) = telegram::record_post(&state.pool, msg, state.cfg.relay.history_limit).await {
        warn!(?err, "failed to record post");
    }
}

/// Map one operator intent to its effect on the dialogue and the console.
pub async fn route(state: &BotState, operator: i64, intent: Intent) -> Routed {
    if let Intent::Input(text) = intent {
        let current = state.dialogues.take(operator);
        return answer(state, operator, current, &text).await;
    }
    // Any menu action abandons a pending prompt.
    state.dialogues.take(operator);
    if let Some(next) = DialogueState::prompted_by(&intent) {
        state.dialogues.set(operator, next);
        return Routed::Reply(Reply::new(prompt(state, next).await, next.menu()));
    }

    let reply = match intent {
        Intent::Start => Reply::new("👋 Relay bot ready. Pick an action below.", Menu::Main),
        Intent::Help => Reply::new(HELP_TEXT, Menu::Main),
        Intent::Cancel => Reply::new("Cancelled.", Menu::Main),
        Intent::Back => Reply::new("Main menu.", Menu::Main),
        Intent::ListsMenu => Reply::new("🗂️ Destination lists", Menu::Lists),
        Intent::SourceMenu => Reply::new("📡 Source", Menu::Source),
        Intent::ScheduleMenu => Reply::new("⏱️ Schedule", Menu::Schedule),
        Intent::ProbeSource => {
            let text = if state.console.probe_source().await {
                "✅ The newest source message is readable."
            } else {
                "❌ No readable source message. Define a source and make sure the bot sees its posts."
            };
            Reply::new(text, Menu::Main)
        }
        Intent::ShowLists => Reply::new(
            show_lists(state).await.unwrap_or_else(failure_text),
            Menu::Lists,
        ),
        Intent::ShowSource => {
            let text = match state.console.source().await {
                Ok(Some(source)) => format!("📡 Current source: {source}"),
                Ok(None) => "📡 Source not set.".to_string(),
                Err(err) => failure_text(err),
            };
            Reply::new(text, Menu::Source)
        }
        Intent::ShowJobs => Reply::new(
            show_jobs(state).await.unwrap_or_else(failure_text),
            Menu::Schedule,
        ),
        // Prompting intents were handled above.
        _ => Reply::new("Use the menu below.", Menu::Main),
    };
    Routed::Reply(reply)
}

async fn prompt(state: &BotState, next: DialogueState) -> String {
    match next {
        DialogueState::AwaitingSource => {
            "Send the source channel or group: @name, t.me link or numeric id.".to_string()
        }
        DialogueState::AwaitingListName => "Send a name for the new list.".to_string(),
        DialogueState::AwaitingListDelete => "Send the name of the list to delete.".to_string(),
        DialogueState::AwaitingTargets => {
            "Send the list name on the first line, then one destination per line.".to_string()
        }
        DialogueState::AwaitingSendSelection => {
            let names = state
                .console
                .list_names()
                .await
                .map(|names| names.join(", "))
                .unwrap_or_default();
            format!("Send a list name or {ALL_LISTS}. Lists: {names}")
        }
        DialogueState::AwaitingJobSpec => {
            "Send the job as name|list|seconds, e.g. hourly|news|3600".to_string()
        }
        DialogueState::AwaitingJobDelete => "Send the name of the job to delete.".to_string(),
        DialogueState::Idle => "Use the menu below.".to_string(),
    }
}

async fn answer(state: &BotState, operator: i64, current: DialogueState, input: &str) -> Routed {
    let console = &state.console;
    let input = input.trim();
    let menu = current.menu();
    // Re-prompt on input the operator can correct.
    let retry = |text: String| {
        state.dialogues.set(operator, current);
        Routed::Reply(Reply::new(format!("{text} Try again or /cancel."), menu))
    };

    let text = match current {
        DialogueState::Idle => "Use the menu below.".to_string(),
        DialogueState::AwaitingSource => match console.define_source(input).await {
            Ok(true) => format!("✅ Source set to {input}."),
            Ok(false) => return retry(format!("❌ Could not resolve {input}.")),
            Err(OpsError::EmptyName) => return retry("Identifier is empty.".to_string()),
            Err(err) => failure_text(err),
        },
        DialogueState::AwaitingListName => match console.create_list(input).await {
            Ok(()) => format!("✅ List {input} created."),
            Err(OpsError::EmptyName) => return retry("Name is empty.".to_string()),
            Err(OpsError::Store(StoreError::Duplicate(_))) => {
                format!("⚠️ List {input} already exists.")
            }
            Err(err) => failure_text(err),
        },
        DialogueState::AwaitingListDelete => match console.delete_list(input).await {
            Ok(true) => format!("🗑️ List {input} deleted."),
            Ok(false) => format!("⚠️ No list named {input}."),
            Err(err) => failure_text(err),
        },
        DialogueState::AwaitingTargets => match console.add_destinations(input).await {
            Ok(AddOutcome::EmptyInput) => return retry("Nothing to add.".to_string()),
            Ok(AddOutcome::UnknownList(name)) => {
                format!("⚠️ No list named {name}. Create it first.")
            }
            Ok(AddOutcome::Added {
                list_name,
                added,
                skipped,
            }) => format!("📥 {list_name}: {added} added, {skipped} skipped."),
            Err(err) => failure_text(err),
        },
        DialogueState::AwaitingSendSelection => {
            if input.is_empty() {
                return retry("Selection is empty.".to_string());
            }
            return Routed::Relay {
                selection: input.to_string(),
            };
        }
        DialogueState::AwaitingJobSpec => match console.create_job(input).await {
            Ok(job) => format!(
                "✅ Job {} created: list {} every {}s.",
                job.name, job.list_name, job.interval_secs
            ),
            Err(err @ (OpsError::InvalidJobSpec | OpsError::Job(JobError::InvalidInterval(_)))) => {
                return retry(format!("⚠️ {err}."))
            }
            Err(err @ OpsError::UnusableList(_)) => format!("⚠️ {err}."),
            Err(OpsError::Job(JobError::Duplicate(_))) => "⚠️ A job with that name already exists.".to_string(),
            Err(err) => failure_text(err),
        },
        DialogueState::AwaitingJobDelete => match console.delete_job(input).await {
            Ok(true) => format!("🗑️ Job {input} deleted."),
            Ok(false) => format!("⚠️ No job named {input}."),
            Err(err) => failure_text(err),
        },
    };
    Routed::Reply(Reply::new(text, menu))
}

async fn show_lists(state: &BotState) -> Result<String, OpsError> {
    let lists = state.console.lists().await?;
    if lists.is_empty() {
        return Ok("No lists yet.".to_string());
    }
    let lines: Vec<String> = lists
        .iter()
        .map(|l| format!("• {} ({} destinations)", l.name, l.destinations))
        .collect();
    Ok(lines.join("\n"))
}

async fn show_jobs(state: &BotState) -> Result<String, OpsError> {
    let jobs = state.console.jobs().await?;
    if jobs.is_empty() {
        return Ok("No scheduled jobs.".to_string());
    }
    let lines: Vec<String> = jobs.iter().map(job_line).collect();
    Ok(lines.join("\n"))
}

fn job_line(record: &JobRecord) -> String {
    format!(
        "• {} → {} every {}s (since {})",
        record.job.name,
        record.job.list_name,
        record.job.interval_secs,
        record.created_at.format("%Y-%m-%d %H:%M UTC")
    )
}

fn failure_text(err: OpsError) -> String {
    warn!(%err, "operator operation failed");
    format!("⚠️ Operation failed: {err}")
}

pub fn describe_outcome(outcome: RelayOutcome) -> String {
    match outcome {
        RelayOutcome::NothingToRelay => {
            "⚠️ Nothing to relay: source not set or its newest message is unreadable.".to_string()
        }
        RelayOutcome::NoDestinations => "⚠️ No destinations for this selection.".to_string(),
        RelayOutcome::Delivered(report) => format!(
            "✅ Relay finished: {} OK, {} failed.",
            report.succeeded, report.failed
        ),
    }
}
