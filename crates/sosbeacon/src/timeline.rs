//! The user-visible status timeline of an activation.

use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Display format for entry timestamps.
const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// How a timeline entry should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Nothing happening.
    Idle,
    /// A step is in progress, or a neutral note such as a cancellation.
    Processing,
    /// The activation completed.
    Success,
    /// The activation failed.
    Error,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One immutable status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Unique within the owning orchestrator.
    pub id: u64,
    /// Human-readable status message.
    pub message: String,
    /// Presentation kind.
    pub kind: EntryKind,
    /// Local wall-clock time for display, e.g. `14:03:27`.
    pub timestamp: String,
}

/// Append-only log of entries for one activation.
///
/// Ids keep increasing across [`Timeline::clear`] so an entry from a previous
/// activation is never confused with a new one.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    next_id: u64,
}

impl Timeline {
    /// Create an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return a copy of it.
    pub fn push(&mut self, kind: EntryKind, message: impl Into<String>) -> TimelineEntry {
        self.next_id += 1;
        let entry = TimelineEntry {
            id: self.next_id,
            message: message.into(),
            kind,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Drop all entries, keeping the id counter.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently appended entry.
    #[must_use]
    pub fn latest(&self) -> Option<&TimelineEntry> {
        self.entries.last()
    }

    /// Entries in append order.
    pub fn iter(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.entries.iter()
    }

    /// Entries newest first, as they are displayed.
    #[must_use]
    pub fn newest_first(&self) -> Vec<TimelineEntry> {
        self.entries.iter().rev().cloned().collect()
    }
}
