//! Append-only record of what the Team Collection did, and the health derived from it.
//!
//! Messages carry an untranslated template with up to two parameters so a UI
//! layer can localize them. Milestones are watermark entries (`Reloaded`,
//! `LogDisplayed`, `ShowedClobbered`) that the "current" views count from.
//! Every entry is also appended to `log.txt` as one JSON object per line.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::events::{CollectionEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    History,
    NewStuff,
    Error,
    /// An error that reloading the collection will not fix.
    ErrorNoReload,
    /// Local work was overwritten and the user has not been told yet.
    ClobberPending,
    // Milestones
    Reloaded,
    LogDisplayed,
    ShowedClobbered,
}

impl MessageKind {
    pub fn is_milestone(self) -> bool {
        matches!(
            self,
            MessageKind::Reloaded | MessageKind::LogDisplayed | MessageKind::ShowedClobbered
        )
    }

    pub fn is_error(self) -> bool {
        matches!(self, MessageKind::Error | MessageKind::ErrorNoReload)
    }
}

/// Overall health shown to the user, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Nominal,
    NewStuff,
    Error,
    ClobberPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub when: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default)]
    pub l10n_id: String,
    /// Template with `{0}` and `{1}` placeholders.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param1: Option<String>,
}

impl LogMessage {
    pub fn new(
        kind: MessageKind,
        l10n_id: &str,
        message: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    ) -> Self {
        Self {
            when: Utc::now(),
            kind,
            l10n_id: l10n_id.to_string(),
            message: message.to_string(),
            param0: param0.map(str::to_string),
            param1: param1.map(str::to_string),
        }
    }

    pub fn milestone(kind: MessageKind) -> Self {
        Self::new(kind, "", "", None, None)
    }

    /// The template with its parameters substituted.
    pub fn formatted(&self) -> String {
        self.message
            .replace("{0}", self.param0.as_deref().unwrap_or(""))
            .replace("{1}", self.param1.as_deref().unwrap_or(""))
    }
}

/// The message log of one collection.
#[derive(Debug)]
pub struct MessageLog {
    path: PathBuf,
    messages: Vec<LogMessage>,
    events: EventBus,
}

impl MessageLog {
    /// A log persisting to `path`. Existing entries are not loaded until
    /// [`MessageLog::load_saved_messages`] is called.
    pub fn new(path: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            path: path.into(),
            messages: Vec::new(),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    pub fn write_message(
        &mut self,
        kind: MessageKind,
        l10n_id: &str,
        message: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    ) {
        self.push(LogMessage::new(kind, l10n_id, message, param0, param1));
    }

    pub fn write_milestone(&mut self, kind: MessageKind) {
        self.push(LogMessage::milestone(kind));
    }

    fn push(&mut self, entry: LogMessage) {
        if let Err(e) = self.append_to_file(&entry) {
            warn!("could not append to {}: {e}", self.path.display());
        }
        self.messages.push(entry);
        self.events.publish(CollectionEvent::StatusChanged);
    }

    fn append_to_file(&self, entry: &LogMessage) -> std::io::Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Merge entries persisted in the log file that are not already in memory.
    /// Unreadable lines are skipped. Returns how many entries were added.
    pub fn load_saved_messages(&mut self) -> usize {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return 0,
        };
        let saved: Vec<LogMessage> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|entry| !self.messages.contains(entry))
            .collect();
        let added = saved.len();
        if added > 0 {
            self.messages.extend(saved);
            self.messages.sort_by_key(|m| m.when);
        }
        added
    }

    fn last_index_of(&self, kinds: &[MessageKind]) -> Option<usize> {
        self.messages.iter().rposition(|m| kinds.contains(&m.kind))
    }

    fn after(&self, index: Option<usize>) -> &[LogMessage] {
        match index {
            Some(i) => &self.messages[i + 1..],
            None => &self.messages,
        }
    }

    /// Errors since the later of the last `LogDisplayed` or `Reloaded`.
    pub fn current_errors(&self) -> Vec<LogMessage> {
        let start = self.last_index_of(&[MessageKind::LogDisplayed, MessageKind::Reloaded]);
        self.after(start)
            .iter()
            .filter(|m| m.kind.is_error())
            .cloned()
            .collect()
    }

    /// NewStuff since the last `Reloaded`.
    pub fn current_new_stuff(&self) -> Vec<LogMessage> {
        let start = self.last_index_of(&[MessageKind::Reloaded]);
        self.after(start)
            .iter()
            .filter(|m| m.kind == MessageKind::NewStuff)
            .cloned()
            .collect()
    }

    /// The latest clobber notice not yet acknowledged by `ShowedClobbered`.
    pub fn current_clobber_message(&self) -> Option<LogMessage> {
        let start = self.last_index_of(&[MessageKind::ShowedClobbered]);
        self.after(start)
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::ClobberPending)
            .cloned()
    }

    pub fn team_collection_status(&self) -> CollectionStatus {
        let reloaded = self.last_index_of(&[MessageKind::Reloaded]);
        let showed = self.last_index_of(&[MessageKind::ShowedClobbered]);
        let clobber_start = match (reloaded, showed) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if self
            .after(clobber_start)
            .iter()
            .any(|m| m.kind == MessageKind::ClobberPending)
        {
            return CollectionStatus::ClobberPending;
        }
        if !self.current_errors().is_empty() {
            return CollectionStatus::Error;
        }
        if !self.current_new_stuff().is_empty() {
            return CollectionStatus::NewStuff;
        }
        CollectionStatus::Nominal
    }

    /// `(kind, "<local date>: <text>")` for display. Reload and log-display
    /// milestones are omitted.
    pub fn pretty_print_messages(&self) -> Vec<(MessageKind, String)> {
        self.messages
            .iter()
            .filter(|m| !matches!(m.kind, MessageKind::Reloaded | MessageKind::LogDisplayed))
            .map(|m| {
                let text = if m.kind == MessageKind::ShowedClobbered {
                    "Repaired conflict".to_string()
                } else {
                    m.formatted()
                };
                (m.kind, format!("{}: {text}", short_date(m.when)))
            })
            .collect()
    }
}

pub(crate) fn short_date(when: DateTime<Utc>) -> String {
    when.with_timezone(&Local).format("%x").to_string()
}
