//! Bounded conversation history.
//!
//! Entries are kept oldest first. Appending past capacity evicts from the
//! front, so the buffer always holds the most recent turns.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_MAX_HISTORY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
}

impl HistoryEntry {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    /// Local `HH:MM` for list display; falls back to the raw timestamp.
    pub fn time_label(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
            .unwrap_or_else(|_| self.timestamp.clone())
    }

    /// First 40 characters of the prompt, with an ellipsis when cut.
    pub fn preview(&self) -> String {
        let mut preview: String = self.prompt.chars().take(40).collect();
        if self.prompt.chars().count() > 40 {
            preview.push_str("...");
        }
        preview
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Rebuild from stored entries, keeping only the newest `capacity`.
    pub fn from_entries(entries: Vec<HistoryEntry>, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        for entry in entries {
            history.push(entry);
        }
        history
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn append(&mut self, prompt: impl Into<String>, response: impl Into<String>) {
        self.push(HistoryEntry::new(prompt, response));
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Remove the entry at an insertion-order index. Out of range is a no-op.
    pub fn delete_at(&mut self, index: usize) -> Option<HistoryEntry> {
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The last `max_pairs` turns, oldest of that window first.
    pub fn recent_turns(&self, max_pairs: usize) -> RecentTurns<'_> {
        let start = self.entries.len().saturating_sub(max_pairs);
        RecentTurns {
            inner: self.entries.range(start..),
        }
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Iterator over `(prompt, response)` pairs of the recent window.
#[derive(Debug, Clone)]
pub struct RecentTurns<'a> {
    inner: std::collections::vec_deque::Iter<'a, HistoryEntry>,
}

impl<'a> Iterator for RecentTurns<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|entry| (entry.prompt.as_str(), entry.response.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RecentTurns<'_> {}
