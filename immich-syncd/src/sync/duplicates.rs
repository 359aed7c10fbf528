use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const MAX_ENTRIES: usize = 200_000;
const CHECK_EVERY: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuplicateScanReport {
    pub files_scanned: u64,
    /// Files beyond the first in each `(name, size)` group.
    pub duplicates: u64,
    pub truncated: bool,
}

/// Estimates local duplicates by file-name and size collisions.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateScanner {
    max_entries: usize,
    check_every: usize,
}

impl Default for DuplicateScanner {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            check_every: CHECK_EVERY,
        }
    }
}

impl DuplicateScanner {
    pub fn with_limits(max_entries: usize, check_every: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            check_every: check_every.max(1),
        }
    }

    /// Walks `root` on the blocking pool. `None` if cancelled.
    pub async fn scan(&self, root: &Path, cancel: &CancellationToken) -> Option<DuplicateScanReport> {
        let scanner = *self;
        let root = root.to_path_buf();
        let token = cancel.clone();
        match tokio::task::spawn_blocking(move || scanner.scan_blocking(&root, &token)).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "duplicate scan task failed");
                None
            }
        }
    }

    fn scan_blocking(&self, root: &Path, cancel: &CancellationToken) -> Option<DuplicateScanReport> {
        let mut groups: HashMap<(OsString, u64), u64> = HashMap::new();
        let mut report = DuplicateScanReport::default();
        let mut visited = 0usize;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));
        for entry in walker {
            if visited >= self.max_entries {
                report.truncated = true;
                break;
            }
            visited += 1;
            if visited % self.check_every == 0 && cancel.is_cancelled() {
                return None;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            report.files_scanned += 1;
            *groups
                .entry((entry.file_name().to_os_string(), metadata.len()))
                .or_default() += 1;
        }

        if cancel.is_cancelled() {
            return None;
        }
        report.duplicates = groups.values().map(|count| count.saturating_sub(1)).sum();
        debug!(
            files = report.files_scanned,
            duplicates = report.duplicates,
            truncated = report.truncated,
            "duplicate scan finished"
        );
        Some(report)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
