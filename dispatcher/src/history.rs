//! Per-order audit trail of dispatch outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries kept per order; the oldest are evicted first
pub const MAX_HISTORY_ENTRIES: usize = 50;
pub const MAX_MESSAGE_LEN: usize = 500;
pub const MAX_COMMAND_LEN: usize = 200;
pub const MAX_RESPONSE_LEN: usize = 200;
/// Entries shown to operators by default
pub const RECENT_ENTRIES: usize = 10;

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub response: String,
}

impl HistoryEntry {
    pub fn new(success: bool, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            success,
            message: truncate(message, MAX_MESSAGE_LEN),
            command: String::new(),
            response: String::new(),
        }
    }

    /// Attaches the command and server answer. `secret` is masked out of the command.
    pub fn with_exchange(mut self, command: &str, response: &str, secret: &str) -> Self {
        self.command = truncate(&redact(command, secret), MAX_COMMAND_LEN);
        self.response = truncate(response, MAX_RESPONSE_LEN);
        self
    }
}

/// Masks every occurrence of `secret` in text bound for logs or history
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, REDACTED)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Bounded FIFO of history entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= MAX_HISTORY_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// The last `count` entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<&HistoryEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).collect()
    }

    /// Success flag of the latest entry, for order list views
    pub fn last_status(&self) -> Option<bool> {
        self.entries.back().map(|entry| entry.success)
    }
}
