//! Operator intents, dialogue states and reply keyboards.
use std::collections::HashMap;
use std::sync::Mutex;
use teloxide::types::{KeyboardButton, KeyboardMarkup};

pub const BTN_SEND_NOW: &str = "💫 Send now";
pub const BTN_LISTS: &str = "🗂️ Destination lists";
pub const BTN_SOURCE: &str = "📡 Source";
pub const BTN_SCHEDULE: &str = "⏱️ Schedule";
pub const BTN_PROBE: &str = "🧪 Test source";
pub const BTN_HELP: &str = "⚙️ Help";
pub const BTN_CREATE_LIST: &str = "➕ Create list";
pub const BTN_DELETE_LIST: &str = "➖ Delete list";
pub const BTN_ADD_TARGETS: &str = "📥 Add destinations";
pub const BTN_SHOW_LISTS: &str = "📤 Show lists";
pub const BTN_DEFINE_SOURCE: &str = "🎯 Define source";
pub const BTN_SHOW_SOURCE: &str = "🔍 Show source";
pub const BTN_NEW_JOB: &str = "🆕 New job";
pub const BTN_SHOW_JOBS: &str = "📃 Show jobs";
pub const BTN_DELETE_JOB: &str = "🗑️ Delete job";
pub const BTN_BACK: &str = "⬅️ Back";

pub const HELP_TEXT: &str = "📚 Quick guide\n\
• 📡 Source → channel or group (with this bot inside) whose newest post is relayed.\n\
• 🗂️ Lists → create lists and add destinations (@name, id, t.me link).\n\
• 💫 Send now → copy the newest source message to a list or ALL.\n\
• ⏱️ Schedule → periodic jobs every N seconds.\n\
• /cancel → abandon the current prompt.";

/// What an operator message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Help,
    Cancel,
    Back,
    SendNow,
    ListsMenu,
    SourceMenu,
    ScheduleMenu,
    ProbeSource,
    CreateList,
    DeleteList,
    AddTargets,
    ShowLists,
    DefineSource,
    ShowSource,
    NewJob,
    ShowJobs,
    DeleteJob,
    /// Free text answering the current prompt.
    Input(String),
}

impl Intent {
    pub fn parse(text: &str) -> Intent {
        let trimmed = text.trim();
        // Commands may carry a bot suffix: /start@relay_bot
        let command = trimmed.split('@').next().unwrap_or(trimmed);
        match command {
            "/start" => return Intent::Start,
            "/help" => return Intent::Help,
            "/cancel" => return Intent::Cancel,
            _ => {}
        }
        match trimmed {
            BTN_SEND_NOW => Intent::SendNow,
            BTN_LISTS => Intent::ListsMenu,
            BTN_SOURCE => Intent::SourceMenu,
            BTN_SCHEDULE => Intent::ScheduleMenu,
            BTN_PROBE => Intent::ProbeSource,
            BTN_HELP => Intent::Help,
            BTN_CREATE_LIST => Intent::CreateList,
            BTN_DELETE_LIST => Intent::DeleteList,
            BTN_ADD_TARGETS => Intent::AddTargets,
            BTN_SHOW_LISTS => Intent::ShowLists,
            BTN_DEFINE_SOURCE => Intent::DefineSource,
            BTN_SHOW_SOURCE => Intent::ShowSource,
            BTN_NEW_JOB => Intent::NewJob,
            BTN_SHOW_JOBS => Intent::ShowJobs,
            BTN_DELETE_JOB => Intent::DeleteJob,
            BTN_BACK => Intent::Back,
            _ => Intent::Input(text.to_string()),
        }
    }
}

/// Which answer the dialogue expects next from an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogueState {
    #[default]
    Idle,
    AwaitingSource,
    AwaitingListName,
    AwaitingListDelete,
    AwaitingTargets,
    AwaitingSendSelection,
    AwaitingJobSpec,
    AwaitingJobDelete,
}

impl DialogueState {
    /// State entered when an intent opens a prompt.
    pub fn prompted_by(intent: &Intent) -> Option<DialogueState> {
        match intent {
            Intent::DefineSource => Some(DialogueState::AwaitingSource),
            Intent::CreateList => Some(DialogueState::AwaitingListName),
            Intent::DeleteList => Some(DialogueState::AwaitingListDelete),
            Intent::AddTargets => Some(DialogueState::AwaitingTargets),
            Intent::SendNow => Some(DialogueState::AwaitingSendSelection),
            Intent::NewJob => Some(DialogueState::AwaitingJobSpec),
            Intent::DeleteJob => Some(DialogueState::AwaitingJobDelete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    Main,
    Lists,
    Source,
    Schedule,
}

impl Menu {
    pub fn keyboard(self) -> KeyboardMarkup {
        let rows: &[&[&str]] = match self {
            Menu::Main => &[
                &[BTN_SEND_NOW, BTN_LISTS],
                &[BTN_SOURCE, BTN_SCHEDULE],
                &[BTN_PROBE, BTN_HELP],
            ],
            Menu::Lists => &[
                &[BTN_CREATE_LIST, BTN_DELETE_LIST],
                &[BTN_ADD_TARGETS, BTN_SHOW_LISTS],
                &[BTN_BACK],
            ],
            Menu::Source => &[&[BTN_DEFINE_SOURCE, BTN_SHOW_SOURCE], &[BTN_BACK]],
            Menu::Schedule => &[&[BTN_NEW_JOB, BTN_SHOW_JOBS], &[BTN_DELETE_JOB, BTN_BACK]],
        };
        KeyboardMarkup::new(
            rows.iter()
                .map(|row| row.iter().map(|label| KeyboardButton::new(*label)).collect::<Vec<_>>()),
        )
        .resize_keyboard(true)
    }
}

impl DialogueState {
    /// Menu shown while answering this state's prompt.
    pub fn menu(self) -> Menu {
        match self {
            DialogueState::Idle | DialogueState::AwaitingSendSelection => Menu::Main,
            DialogueState::AwaitingSource => Menu::Source,
            DialogueState::AwaitingListName
            | DialogueState::AwaitingListDelete
            | DialogueState::AwaitingTargets => Menu::Lists,
            DialogueState::AwaitingJobSpec | DialogueState::AwaitingJobDelete => Menu::Schedule,
        }
    }
}

/// Dialogue state per operator id.
#[derive(Debug, Default)]
pub struct Dialogues {
    states: Mutex<HashMap<i64, DialogueState>>,
}

impl Dialogues {
    pub fn set(&self, operator: i64, state: DialogueState) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        if state == DialogueState::Idle {
            states.remove(&operator);
        } else {
            states.insert(operator, state);
        }
    }

    /// Current state, resetting it to idle.
    pub fn take(&self, operator: i64) -> DialogueState {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&operator)
            .unwrap_or_default()
    }
}
