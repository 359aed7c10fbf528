use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::index::{IndexError, read_json_or_default, write_json_atomic};

pub const HISTORY_CAPACITY: usize = 100;
pub const ERROR_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Download,
    Upload,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Download => "download",
            RunKind::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryItem {
    pub kind: RunKind,
    pub started_at: i64,
    pub finished_at: i64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub errors: u64,
    pub outcome: RunOutcome,
}

/// Finished runs, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncHistory {
    path: PathBuf,
    items: VecDeque<SyncHistoryItem>,
}

impl SyncHistory {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let items: Vec<SyncHistoryItem> = read_json_or_default(&path).await?;
        let mut items: VecDeque<_> = items.into();
        items.truncate(HISTORY_CAPACITY);
        Ok(Self { path, items })
    }

    pub fn record(&mut self, item: SyncHistoryItem) {
        self.items.push_front(item);
        self.items.truncate(HISTORY_CAPACITY);
    }

    pub fn items(&self) -> impl Iterator<Item = &SyncHistoryItem> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&SyncHistoryItem> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self) -> Result<(), IndexError> {
        write_json_atomic(&self.path, &self.items).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub at: i64,
    pub context: &'static str,
    pub message: String,
}

/// In-memory rolling log of run-aborting errors.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<ErrorEntry>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }
}

impl ErrorLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: i64, context: &'static str, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ErrorEntry {
            at,
            context,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per entry, oldest first.
    pub fn export(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}\t{}\t{}\n", entry.at, entry.context, entry.message))
            .collect()
    }
}
