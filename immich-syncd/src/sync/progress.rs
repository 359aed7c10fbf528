use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::history::RunKind;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    Enumerating,
    Discovering,
    Checking,
    Transferring,
    Verifying,
    WritingSidecar,
    Indexing,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Enumerating => "enumerating",
            Stage::Discovering => "discovering",
            Stage::Checking => "checking",
            Stage::Transferring => "transferring",
            Stage::Verifying => "verifying",
            Stage::WritingSidecar => "writing sidecar",
            Stage::Indexing => "indexing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

/// Counters of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub transferred: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub server_duplicates: u64,
    pub bytes: u64,
    pub processed: u64,
    pub total: Option<u64>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub kind: RunKind,
    pub stage: Stage,
    pub summary: RunSummary,
    pub current: Option<String>,
}

/// Hands progress to the coordinator at most once per interval. Terminal
/// updates go through [`ProgressReporter::force`].
#[derive(Debug)]
pub struct ProgressReporter {
    kind: RunKind,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(kind: RunKind, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            kind,
            tx: Some(tx),
            interval: PROGRESS_INTERVAL,
            last_sent: None,
        }
    }

    pub fn disabled(kind: RunKind) -> Self {
        Self {
            kind,
            tx: None,
            interval: PROGRESS_INTERVAL,
            last_sent: None,
        }
    }

    pub fn report(&mut self, stage: Stage, summary: &RunSummary, current: Option<&str>) {
        let now = Instant::now();
        if let Some(last) = self.last_sent
            && now.duration_since(last) < self.interval
        {
            return;
        }
        self.send(now, stage, summary, current);
    }

    pub fn force(&mut self, stage: Stage, summary: &RunSummary, current: Option<&str>) {
        self.send(Instant::now(), stage, summary, current);
    }

    fn send(&mut self, now: Instant, stage: Stage, summary: &RunSummary, current: Option<&str>) {
        let Some(tx) = &self.tx else {
            return;
        };
        self.last_sent = Some(now);
        let _ = tx.send(ProgressUpdate {
            kind: self.kind,
            stage,
            summary: *summary,
            current: current.map(str::to_string),
        });
    }
}
