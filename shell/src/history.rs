//! Bounded log of accepted lines with a recall cursor.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Accepted lines, oldest first, plus the state of an in-progress recall.
///
/// `cursor == len()` means the user is looking at the live edit rather than a
/// recalled entry. When browsing starts, the live edit is parked in `backup` and
/// handed back when the user browses past the newest entry.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    cursor: usize,
    backup: Option<Vec<char>>,
}

impl History {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            cursor: 0,
            backup: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
        self.reset_cursor();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &str> + DoubleEndedIterator {
        self.entries.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the recall cursor; values past the end land on the live edit.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.entries.len());
    }

    /// Back to the live edit, dropping any parked edit.
    pub fn reset_cursor(&mut self) {
        self.cursor = self.entries.len();
        self.backup = None;
    }

    pub fn is_browsing(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Appends a trimmed line. Blank lines are ignored.
    pub fn append(&mut self, line: &str) {
        self.commit(line, false);
    }

    /// Records a submitted line and returns to the live edit.
    ///
    /// When the line is an edited recall of an existing entry, that entry is
    /// overwritten in place instead of growing the log. Blank lines are not recorded.
    pub fn commit(&mut self, line: &str, edited_recall: bool) {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if edited_recall && self.is_browsing() {
                self.entries[self.cursor] = trimmed.to_string();
            } else {
                self.entries.push_back(trimmed.to_string());
                self.evict();
            }
        }
        self.reset_cursor();
    }

    /// Steps to the previous entry.
    ///
    /// `current` is what is on screen and `edited` tells whether it differs from the
    /// entry it was loaded from. Returns the entry to display, or `None` at the oldest.
    pub fn browse_up(&mut self, current: &[char], edited: bool) -> Option<Vec<char>> {
        if self.cursor == 0 {
            return None;
        }
        self.leave_current(current, edited);
        self.cursor -= 1;
        Some(self.entries[self.cursor].chars().collect())
    }

    /// Steps to the next entry, or back to the parked live edit after the newest one.
    /// Returns `None` when already at the live edit.
    pub fn browse_down(&mut self, current: &[char], edited: bool) -> Option<Vec<char>> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        self.leave_current(current, edited);
        self.cursor += 1;
        if self.cursor == self.entries.len() {
            return Some(self.backup.take().unwrap_or_default());
        }
        Some(self.entries[self.cursor].chars().collect())
    }

    fn leave_current(&mut self, current: &[char], edited: bool) {
        if self.cursor == self.entries.len() {
            self.backup = Some(current.to_vec());
        } else if edited {
            let text: String = current.iter().collect();
            let text = text.trim();
            if !text.is_empty() {
                self.entries[self.cursor] = text.to_string();
            }
        }
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Loads entries from `path`, keeping only the newest `capacity` of them.
    ///
    /// A missing file is an empty history.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("can't read history from {}", path.display()));
            }
        };

        for line in data.lines() {
            self.append(line);
        }
        tracing::debug!(entries = self.len(), path = %path.display(), "history loaded");
        Ok(())
    }

    /// Rewrites `path` with every entry, one per line.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("can't create {}", parent.display()))?;
        }
        let mut file = fs::File::create(path)
            .with_context(|| format!("can't write history to {}", path.display()))?;
        for entry in &self.entries {
            writeln!(file, "{entry}")?;
        }
        Ok(())
    }
}
