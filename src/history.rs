//! Append-only conversation history with retention-window eviction.
//!
//! Every [`add`](ConversationHistory::add) is written through to the
//! snapshot immediately, so a crash loses at most the entry being written.
//! Entries older than the retention window are dropped when the snapshot
//! is loaded, which keeps the file bounded without a compaction job.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::models::{ChatMessage, HistoryEntry, HistoryRole};
use crate::snapshot::{self, SnapshotError};

pub struct ConversationHistory {
    path: PathBuf,
    retention_seconds: f64,
    entries: Vec<HistoryEntry>,
}

/// Current time in fractional seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl ConversationHistory {
    /// An empty history persisting to `path`. Does not touch the file.
    pub fn new(path: impl Into<PathBuf>, retention_seconds: f64) -> Self {
        Self {
            path: path.into(),
            retention_seconds,
            entries: Vec::new(),
        }
    }

    /// Create a history and load its snapshot, evicting expired entries.
    ///
    /// A missing, malformed, or unreadable snapshot yields an empty history.
    pub fn open(path: impl Into<PathBuf>, retention_seconds: f64) -> Self {
        let mut history = Self::new(path, retention_seconds);
        match history.load() {
            Ok(n) => info!(path = %history.path.display(), entries = n, "loaded history"),
            Err(SnapshotError::NotFound(_)) => {
                debug!(path = %history.path.display(), "no history snapshot yet")
            }
            Err(e @ SnapshotError::Corrupt { .. }) => {
                warn!(error = %e, "ignoring corrupt history snapshot")
            }
            Err(e @ SnapshotError::Io { .. }) => {
                error!(error = %e, "could not read history snapshot, starting empty")
            }
        }
        history
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the in-memory log with the snapshot, keeping only entries
    /// younger than the retention window. Returns the number kept.
    pub fn load(&mut self) -> Result<usize, SnapshotError> {
        self.load_at(now_seconds())
    }

    fn load_at(&mut self, now: f64) -> Result<usize, SnapshotError> {
        self.entries.clear();
        let entries: Vec<HistoryEntry> = snapshot::read_json(&self.path)?;
        let total = entries.len();
        self.entries = entries
            .into_iter()
            .filter(|e| now - e.timestamp < self.retention_seconds)
            .collect();
        if total > self.entries.len() {
            debug!(evicted = total - self.entries.len(), "evicted expired history entries");
        }
        Ok(self.entries.len())
    }

    /// Append an entry stamped with the current time and persist.
    ///
    /// Timestamps never go backwards within a process, even if the wall
    /// clock does.
    pub fn add(&mut self, role: HistoryRole, content: impl Into<String>) {
        let mut timestamp = now_seconds();
        if let Some(last) = self.entries.last() {
            timestamp = timestamp.max(last.timestamp);
        }
        self.entries.push(HistoryEntry {
            role,
            content: content.into(),
            timestamp,
        });
        self.save();
    }

    /// The last `limit` entries as role/content messages, oldest first.
    pub fn get_recent(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..]
            .iter()
            .map(HistoryEntry::to_message)
            .collect()
    }

    pub fn try_save(&self) -> Result<(), SnapshotError> {
        snapshot::write_json(&self.path, &self.entries, true)
    }

    fn save(&self) {
        if let Err(e) = self.try_save() {
            error!(error = %e, "failed to persist history");
        }
    }

    /// Empty the log and delete the snapshot file.
    pub fn clear(&mut self) -> Result<(), SnapshotError> {
        self.entries.clear();
        snapshot::remove(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use tempfile::TempDir;

    const DAY: f64 = 86_400.0;

    fn history_in(tmp: &TempDir) -> ConversationHistory {
        ConversationHistory::new(tmp.path().join("chat_history.json"), 3.0 * DAY)
    }

    #[test]
    fn add_writes_through() {
        let tmp = TempDir::new().unwrap();
        let mut history = history_in(&tmp);
        history.add(HistoryRole::User, "hello");

        let reopened = ConversationHistory::open(history.path().to_path_buf(), 3.0 * DAY);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.entries()[0].content, "hello");
    }

    #[test]
    fn get_recent_fewer_than_limit_returns_all_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut history = history_in(&tmp);
        history.add(HistoryRole::User, "q1");
        history.add(HistoryRole::Assistant, "a1");

        let recent = history.get_recent(6);
        assert_eq!(
            recent,
            vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")]
        );
    }

    #[test]
    fn get_recent_returns_last_limit() {
        let tmp = TempDir::new().unwrap();
        let mut history = history_in(&tmp);
        for i in 0..10 {
            history.add(HistoryRole::User, format!("m{}", i));
        }
        let recent = history.get_recent(3);
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
        assert!(recent.iter().all(|m| m.role == Role::User));
        assert!(history.get_recent(0).is_empty());
    }

    #[test]
    fn timestamps_non_decreasing() {
        let tmp = TempDir::new().unwrap();
        let mut history = history_in(&tmp);
        for i in 0..20 {
            history.add(HistoryRole::Assistant, i.to_string());
        }
        let ts: Vec<f64> = history.entries().iter().map(|e| e.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn load_evicts_entries_outside_retention() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chat_history.json");
        let now = 1_700_000_000.0;
        let entries = vec![
            HistoryEntry {
                role: HistoryRole::User,
                content: "ancient".to_string(),
                timestamp: now - 4.0 * DAY,
            },
            HistoryEntry {
                role: HistoryRole::Assistant,
                content: "recent".to_string(),
                timestamp: now - 2.0 * DAY,
            },
        ];
        snapshot::write_json(&path, &entries, true).unwrap();

        let mut history = ConversationHistory::new(&path, 3.0 * DAY);
        assert_eq!(history.load_at(now).unwrap(), 1);
        assert_eq!(history.entries()[0].content, "recent");
    }

    #[test]
    fn open_evicts_relative_to_wall_clock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chat_history.json");
        let now = now_seconds();
        let entries = vec![
            HistoryEntry {
                role: HistoryRole::User,
                content: "old".to_string(),
                timestamp: now - 3.5 * DAY,
            },
            HistoryEntry {
                role: HistoryRole::User,
                content: "new".to_string(),
                timestamp: now - 60.0,
            },
        ];
        snapshot::write_json(&path, &entries, true).unwrap();

        let history = ConversationHistory::open(&path, 3.0 * DAY);
        let contents: Vec<&str> = history.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["new"]);
    }

    #[test]
    fn malformed_snapshot_yields_empty_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chat_history.json");
        std::fs::write(&path, "this is not json").unwrap();
        let history = ConversationHistory::open(&path, 3.0 * DAY);
        assert!(history.is_empty());
    }

    #[test]
    fn clear_deletes_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut history = history_in(&tmp);
        history.add(HistoryRole::User, "bye");
        assert!(history.path().exists());

        history.clear().unwrap();
        assert!(history.is_empty());
        assert!(!history.path().exists());

        // Clearing again with no file is fine.
        history.clear().unwrap();
    }
}
