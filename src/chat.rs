use std::collections::VecDeque;

pub const CHAT_CAPACITY: usize = 50;

/// Append-only chat history that keeps only the most recent entries.
///
/// Every appended entry gets a sequence number (starting at 1) so readers can
/// ask for whatever arrived after the last entry they saw, even when older
/// entries have been evicted in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatLog {
    entries: VecDeque<String>,
    capacity: usize,
    appended: u64,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::with_capacity(CHAT_CAPACITY)
    }
}

impl ChatLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            appended: 0,
        }
    }

    /// Appends an entry, returning the evicted oldest entry if the log was full.
    pub fn push(&mut self, entry: impl Into<String>) -> Option<String> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry.into());
        self.appended += 1;
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Sequence number of the newest entry (0 when nothing was ever appended).
    pub fn last_seq(&self) -> u64 {
        self.appended
    }

    /// Retained entries appended after `seq`, oldest first.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &str> {
        let first_retained = self.appended - self.entries.len() as u64;
        let skip = seq.saturating_sub(first_retained) as usize;
        self.entries.iter().skip(skip).map(String::as_str)
    }
}
