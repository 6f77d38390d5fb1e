//! Bounded event journal shared by every writer in the simulation
//!
//! Entries feed two readers: the operator (via `tracing` and the CLI dump)
//! and the decision oracle, which only ever sees the newest few entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::core::types::AgentId;

/// What kind of event an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    System,
    Principle,
    Decision,
    Retry,
    Error,
    Combat,
    Victory,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogCategory::System => "SYSTEM",
            LogCategory::Principle => "PRINCIPLE",
            LogCategory::Decision => "DECISION",
            LogCategory::Retry => "RETRY",
            LogCategory::Error => "ERROR",
            LogCategory::Combat => "COMBAT",
            LogCategory::Victory => "VICTORY",
        };
        f.write_str(label)
    }
}

/// A single immutable journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
    pub author: Option<AgentId>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.category)?;
        if let Some(author) = self.author {
            write!(f, " {}", author)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Append-only FIFO holding the last `capacity` entries
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest one when full
    pub fn push(&self, category: LogCategory, message: impl Into<String>, author: Option<AgentId>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            category,
            message: message.into(),
            author,
        };

        match category {
            LogCategory::Error => tracing::error!(author = ?author, "{}", entry.message),
            LogCategory::Retry => tracing::warn!(author = ?author, "{}", entry.message),
            LogCategory::Combat => tracing::debug!(author = ?author, "{}", entry.message),
            _ => tracing::info!(category = %category, author = ?author, "{}", entry.message),
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>) {
        self.push(category, message, None);
    }

    pub fn agent(&self, category: LogCategory, author: AgentId, message: impl Into<String>) {
        self.push(category, message, Some(author));
    }

    /// The newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Every retained entry, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
