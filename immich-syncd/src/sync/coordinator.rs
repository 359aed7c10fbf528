use std::path::PathBuf;
use std::time::Duration;

use immich_core::ImmichClient;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::download::{DownloadOptions, DownloadPipeline};
use super::duplicates::{DuplicateScanReport, DuplicateScanner};
use super::error::RunFailure;
use super::history::{ErrorLog, RunKind, RunOutcome, SyncHistory, SyncHistoryItem};
use super::index::{DownloadIndex, DuplicateCache, IndexError, StatePaths, UploadIndex};
use super::local_watcher::Debouncer;
use super::now_unix;
use super::probe::{ConnectionProbe, ProbeReport};
use super::progress::{ProgressReporter, ProgressUpdate, RunSummary, Stage};
use super::retry::RetryPolicy;
use super::throttle::Throttle;
use super::transfer::{DEFAULT_TRANSFER_TIMEOUT, TransferClient};
use super::upload::{UploadOptions, UploadPipeline};

pub const PROBE_DEBOUNCE: Duration = Duration::from_millis(600);
pub const DEFAULT_RESCAN_DEBOUNCE: Duration = Duration::from_secs(2);

/// Everything a run needs besides the ledgers and the client.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub download: DownloadOptions,
    pub upload: Option<UploadOptions>,
    pub watch_upload_dir: bool,
    pub retry: RetryPolicy,
    pub throttle: Throttle,
    pub transfer_timeout: Duration,
    pub rescan_debounce: Duration,
    pub manual_override: bool,
}

impl EngineSettings {
    pub fn new(download: DownloadOptions) -> Self {
        Self {
            download,
            upload: None,
            watch_upload_dir: false,
            retry: RetryPolicy::default(),
            throttle: Throttle::default(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            rescan_debounce: DEFAULT_RESCAN_DEBOUNCE,
            manual_override: false,
        }
    }

    fn watch_target(&self) -> Option<WatchTarget> {
        let upload = self.upload.as_ref()?;
        self.watch_upload_dir.then(|| WatchTarget {
            path: upload.watch_dir.clone(),
            recursive: upload.include_subfolders,
        })
    }
}

/// The four persisted structures, loaded once at startup.
#[derive(Debug)]
pub struct Ledgers {
    pub download: DownloadIndex,
    pub upload: UploadIndex,
    pub duplicates: DuplicateCache,
    pub history: SyncHistory,
}

impl Ledgers {
    pub async fn load(paths: &StatePaths) -> Result<Self, IndexError> {
        Ok(Self {
            download: DownloadIndex::load(paths.download_index()).await?,
            upload: UploadIndex::load(paths.upload_index()).await?,
            duplicates: DuplicateCache::load(paths.duplicate_cache()).await?,
            history: SyncHistory::load(paths.history()).await?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectionSnapshot {
    pub active: bool,
    pub stage: Option<Stage>,
    pub status: String,
    pub current: Option<String>,
    pub processed: u64,
    pub total: Option<u64>,
    pub bytes: u64,
    pub bytes_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineSnapshot {
    pub download: DirectionSnapshot,
    pub upload: DirectionSnapshot,
    pub connection: Option<ProbeReport>,
    pub probing: bool,
    pub duplicate_scan: Option<DuplicateScanReport>,
    pub scanning: bool,
    pub paused: bool,
    pub manual_override: bool,
    pub watch_target: Option<WatchTarget>,
    pub history: Vec<SyncHistoryItem>,
    pub error_count: usize,
    pub last_notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResponse {
    Finished(SyncHistoryItem),
    Refused(String),
}

#[derive(Debug)]
pub enum Command {
    StartDownload(Option<oneshot::Sender<RunResponse>>),
    StartUpload(Option<oneshot::Sender<RunResponse>>),
    Cancel(RunKind),
    StopAll,
    SetPaused(bool),
    SetManualOverride(bool),
    FolderChanged,
    UpdateCredentials { server_url: String, api_key: String },
    Reconfigure(Box<EngineSettings>),
    Probe,
    ScanDuplicates,
    ClearDuplicateCache,
    Reset,
    ExportErrors(oneshot::Sender<String>),
    Shutdown,
}

/// Cloneable front of the coordinator task.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    pub fn start_download(&self) {
        self.send(Command::StartDownload(None));
    }

    pub fn start_upload(&self) {
        self.send(Command::StartUpload(None));
    }

    /// Starts a run and waits for it to finish.
    pub async fn run_to_completion(&self, kind: RunKind) -> RunResponse {
        let (tx, rx) = oneshot::channel();
        let command = match kind {
            RunKind::Download => Command::StartDownload(Some(tx)),
            RunKind::Upload => Command::StartUpload(Some(tx)),
        };
        if !self.send(command) {
            return RunResponse::Refused("engine stopped".into());
        }
        rx.await
            .unwrap_or_else(|_| RunResponse::Refused("engine stopped".into()))
    }

    pub async fn export_errors(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::ExportErrors(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

enum WorkerEvent {
    DownloadFinished {
        index: DownloadIndex,
        result: Result<RunSummary, RunFailure>,
    },
    UploadFinished {
        index: UploadIndex,
        cache: DuplicateCache,
        result: Result<RunSummary, RunFailure>,
    },
    ProbeFinished {
        generation: u64,
        report: Option<ProbeReport>,
    },
    ScanFinished(Option<DuplicateScanReport>),
}

struct ActiveRun {
    cancel: CancellationToken,
    started_at: i64,
    started: Instant,
    responder: Option<oneshot::Sender<RunResponse>>,
}

/// Owns all mutable engine state; runs as a single task.
pub struct Coordinator {
    settings: EngineSettings,
    client: Option<ImmichClient>,
    download_index: Option<DownloadIndex>,
    upload_index: Option<UploadIndex>,
    duplicate_cache: Option<DuplicateCache>,
    history: SyncHistory,
    errors: ErrorLog,
    download: Option<ActiveRun>,
    upload: Option<ActiveRun>,
    paused: bool,
    manual_override: bool,
    rescan: Debouncer,
    rescan_pending: bool,
    probe_debounce: Debouncer,
    probe_cancel: Option<CancellationToken>,
    probe_generation: u64,
    scan_cancel: Option<CancellationToken>,
    snapshot: EngineSnapshot,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl Coordinator {
    pub fn spawn(
        settings: EngineSettings,
        client: Option<ImmichClient>,
        ledgers: Ledgers,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator {
            rescan: Debouncer::new(settings.rescan_debounce),
            manual_override: settings.manual_override,
            client,
            download_index: Some(ledgers.download),
            upload_index: Some(ledgers.upload),
            duplicate_cache: Some(ledgers.duplicates),
            history: ledgers.history,
            errors: ErrorLog::default(),
            download: None,
            upload: None,
            paused: false,
            rescan_pending: false,
            probe_debounce: Debouncer::new(PROBE_DEBOUNCE),
            probe_cancel: None,
            probe_generation: 0,
            scan_cancel: None,
            snapshot: EngineSnapshot::default(),
            snapshot_tx: watch::channel(EngineSnapshot::default()).0,
            events_tx,
            progress_tx,
            settings,
        };
        coordinator.refresh_snapshot();
        let snapshots = coordinator.snapshot_tx.subscribe();

        let task = tokio::spawn(coordinator.run(commands_rx, events_rx, progress_rx));
        (
            EngineHandle {
                commands: commands_tx,
                snapshots,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        mut progress: mpsc::UnboundedReceiver<ProgressUpdate>,
    ) {
        loop {
            let rescan_at = self.rescan.deadline();
            let probe_at = self.probe_debounce.deadline();
            tokio::select! {
                biased;
                Some(update) = progress.recv() => self.on_progress(update),
                Some(event) = events.recv() => self.on_event(event).await,
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = sleep_until(rescan_at) => {
                    if self.rescan.fire(Instant::now()) {
                        debug!("debounced rescan fired");
                        self.start_upload(None);
                    }
                }
                _ = sleep_until(probe_at) => {
                    if self.probe_debounce.fire(Instant::now()) {
                        self.start_probe();
                    }
                }
            }
            self.publish();
        }

        info!("coordinator stopping");
        self.cancel_runs();
        if let Some(token) = self.probe_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.scan_cancel.take() {
            token.cancel();
        }
        while self.download.is_some() || self.upload.is_some() {
            match events.recv().await {
                Some(event) => self.on_event(event).await,
                None => break,
            }
        }
        self.publish();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::StartDownload(responder) => self.start_download(responder),
            Command::StartUpload(responder) => self.start_upload(responder),
            Command::Cancel(kind) => {
                let run = match kind {
                    RunKind::Download => &self.download,
                    RunKind::Upload => &self.upload,
                };
                if let Some(run) = run {
                    info!(kind = kind.as_str(), "cancelling run");
                    run.cancel.cancel();
                }
            }
            Command::StopAll => {
                self.cancel_runs();
                self.rescan.cancel();
                self.rescan_pending = false;
            }
            Command::SetPaused(paused) => {
                self.paused = paused;
                if paused && !self.manual_override {
                    info!("paused, cancelling active runs");
                    self.cancel_runs();
                }
            }
            Command::SetManualOverride(enabled) => {
                self.manual_override = enabled;
                if !enabled && self.paused {
                    self.cancel_runs();
                }
            }
            Command::FolderChanged => {
                if self.upload.is_some() {
                    self.rescan_pending = true;
                } else {
                    self.rescan.poke(Instant::now());
                }
            }
            Command::UpdateCredentials {
                server_url,
                api_key,
            } => self.update_credentials(&server_url, api_key),
            Command::Reconfigure(settings) => {
                self.rescan = Debouncer::new(settings.rescan_debounce);
                self.manual_override = settings.manual_override;
                self.settings = *settings;
                info!("settings updated");
            }
            Command::Probe => {
                self.probe_debounce.cancel();
                self.start_probe();
            }
            Command::ScanDuplicates => self.start_scan(),
            Command::ClearDuplicateCache => self.clear_duplicate_cache().await,
            Command::Reset => self.reset().await,
            Command::ExportErrors(reply) => {
                let _ = reply.send(self.errors.export());
            }
            Command::Shutdown => {}
        }
    }

    fn refusal(&self, kind: RunKind) -> Option<String> {
        let active = match kind {
            RunKind::Download => self.download.is_some(),
            RunKind::Upload => self.upload.is_some(),
        };
        if active {
            return Some(format!("{} already running", kind.as_str()));
        }
        if self.paused && !self.manual_override {
            return Some("sync is paused".into());
        }
        if self.client.is_none() {
            return Some("server connection is not configured".into());
        }
        None
    }

    fn start_download(&mut self, responder: Option<oneshot::Sender<RunResponse>>) {
        if let Some(reason) = self.refusal(RunKind::Download) {
            debug!(reason = %reason, "download start ignored");
            refuse(responder, reason);
            return;
        }
        let (Some(client), Some(mut index)) = (self.client.clone(), self.download_index.take())
        else {
            refuse(responder, "download index is unavailable".into());
            return;
        };

        let transfer = TransferClient::with_timeout(client, self.settings.transfer_timeout);
        let pipeline = DownloadPipeline::new(transfer, self.settings.download.clone())
            .with_retry(self.settings.retry)
            .with_throttle(self.settings.throttle);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events_tx.clone();
        let progress_tx = self.progress_tx.clone();
        tokio::spawn(async move {
            let mut progress = ProgressReporter::new(RunKind::Download, progress_tx);
            let result = pipeline.run(&mut index, &token, &mut progress).await;
            let _ = events.send(WorkerEvent::DownloadFinished { index, result });
        });

        info!("download run started");
        self.download = Some(ActiveRun::new(cancel, responder));
        self.snapshot.download = DirectionSnapshot {
            active: true,
            status: "Starting download".into(),
            ..DirectionSnapshot::default()
        };
    }

    fn start_upload(&mut self, responder: Option<oneshot::Sender<RunResponse>>) {
        if let Some(reason) = self.refusal(RunKind::Upload) {
            debug!(reason = %reason, "upload start ignored");
            refuse(responder, reason);
            return;
        }
        let Some(options) = self.settings.upload.clone() else {
            refuse(responder, "no upload folder is configured".into());
            return;
        };
        let (Some(client), Some(mut index), Some(mut cache)) = (
            self.client.clone(),
            self.upload_index.take(),
            self.duplicate_cache.take(),
        ) else {
            refuse(responder, "upload ledgers are unavailable".into());
            return;
        };

        let pipeline = UploadPipeline::new(client, options)
            .with_retry(self.settings.retry)
            .with_throttle(self.settings.throttle);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events_tx.clone();
        let progress_tx = self.progress_tx.clone();
        tokio::spawn(async move {
            let mut progress = ProgressReporter::new(RunKind::Upload, progress_tx);
            let result = pipeline
                .run(&mut index, &mut cache, &token, &mut progress)
                .await;
            let _ = events.send(WorkerEvent::UploadFinished {
                index,
                cache,
                result,
            });
        });

        info!("upload run started");
        self.rescan.cancel();
        self.upload = Some(ActiveRun::new(cancel, responder));
        self.snapshot.upload = DirectionSnapshot {
            active: true,
            status: "Starting upload".into(),
            ..DirectionSnapshot::default()
        };
    }

    fn cancel_runs(&self) {
        for run in [&self.download, &self.upload].into_iter().flatten() {
            run.cancel.cancel();
        }
    }

    fn update_credentials(&mut self, server_url: &str, api_key: String) {
        if let Some(token) = self.probe_cancel.take() {
            token.cancel();
        }
        self.snapshot.connection = None;
        self.snapshot.probing = false;
        match ImmichClient::new(server_url, api_key) {
            Ok(client) => {
                info!(server = client.base_url(), "credentials updated");
                self.client = Some(client);
                self.probe_debounce.poke(Instant::now());
            }
            Err(err) => {
                warn!(error = %err, "rejected credentials");
                self.client = None;
                self.probe_debounce.cancel();
                self.snapshot.last_notice = Some(format!("Invalid server settings: {err}"));
            }
        }
    }

    fn start_probe(&mut self) {
        if let Some(token) = self.probe_cancel.take() {
            token.cancel();
        }
        let Some(client) = self.client.clone() else {
            self.snapshot.probing = false;
            self.snapshot.last_notice = Some("Server connection is not configured".into());
            return;
        };
        self.probe_generation += 1;
        let generation = self.probe_generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let report = ConnectionProbe::new(client).run(&token).await;
            let _ = events.send(WorkerEvent::ProbeFinished { generation, report });
        });
        self.probe_cancel = Some(cancel);
        self.snapshot.probing = true;
    }

    fn start_scan(&mut self) {
        if self.scan_cancel.is_some() {
            debug!("duplicate scan already running");
            return;
        }
        let Some(root) = self
            .settings
            .upload
            .as_ref()
            .map(|upload| upload.watch_dir.clone())
        else {
            self.snapshot.last_notice = Some("No upload folder to scan".into());
            return;
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let report = DuplicateScanner::default().scan(&root, &token).await;
            let _ = events.send(WorkerEvent::ScanFinished(report));
        });
        self.scan_cancel = Some(cancel);
        self.snapshot.scanning = true;
    }

    async fn clear_duplicate_cache(&mut self) {
        if self.upload.is_some() {
            self.snapshot.last_notice =
                Some("Duplicate cache can't be cleared during an upload".into());
            return;
        }
        if let Some(cache) = self.duplicate_cache.as_mut() {
            cache.clear();
            match cache.save().await {
                Ok(()) => {
                    info!("duplicate cache cleared");
                    self.snapshot.last_notice = Some("Duplicate cache cleared".into());
                }
                Err(err) => self.record_error("duplicate cache", err.to_string()),
            }
        }
    }

    async fn reset(&mut self) {
        if self.download.is_some() || self.upload.is_some() {
            self.snapshot.last_notice = Some("Reset is only possible while idle".into());
            return;
        }
        let mut result: Result<(), IndexError> = Ok(());
        if let Some(index) = self.download_index.as_mut() {
            index.clear();
            result = result.and(index.save().await);
        }
        if let Some(index) = self.upload_index.as_mut() {
            index.clear();
            result = result.and(index.save().await);
        }
        if let Some(cache) = self.duplicate_cache.as_mut() {
            cache.clear();
            result = result.and(cache.save().await);
        }
        self.history.clear();
        result = result.and(self.history.save().await);

        match result {
            Ok(()) => {
                info!("sync state reset");
                self.snapshot.last_notice = Some("Sync state reset".into());
            }
            Err(err) => self.record_error("reset", err.to_string()),
        }
    }

    fn on_progress(&mut self, update: ProgressUpdate) {
        let (run, direction) = match update.kind {
            RunKind::Download => (&self.download, &mut self.snapshot.download),
            RunKind::Upload => (&self.upload, &mut self.snapshot.upload),
        };
        let Some(run) = run else {
            return;
        };
        let elapsed = run.started.elapsed().as_secs_f64();
        direction.stage = Some(update.stage);
        direction.processed = update.summary.processed;
        direction.total = update.summary.total;
        direction.bytes = update.summary.bytes;
        direction.bytes_per_second = if elapsed > 0.0 {
            update.summary.bytes as f64 / elapsed
        } else {
            0.0
        };
        direction.status = status_text(update.kind, update.stage, &update.summary, update.current.as_deref());
        direction.current = update.current;
    }

    async fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::DownloadFinished { index, result } => {
                self.download_index = Some(index);
                if let Some(run) = self.download.take() {
                    self.finish_run(RunKind::Download, run, result).await;
                }
            }
            WorkerEvent::UploadFinished {
                index,
                cache,
                result,
            } => {
                self.upload_index = Some(index);
                self.duplicate_cache = Some(cache);
                if let Some(run) = self.upload.take() {
                    self.finish_run(RunKind::Upload, run, result).await;
                }
                if self.rescan_pending {
                    self.rescan_pending = false;
                    self.rescan.poke(Instant::now());
                }
            }
            WorkerEvent::ProbeFinished { generation, report } => {
                if generation != self.probe_generation {
                    return;
                }
                self.probe_cancel = None;
                self.snapshot.probing = false;
                if let Some(report) = report {
                    info!(report = %report, "connection probe finished");
                    self.snapshot.connection = Some(report);
                }
            }
            WorkerEvent::ScanFinished(report) => {
                self.scan_cancel = None;
                self.snapshot.scanning = false;
                if let Some(report) = report {
                    self.snapshot.duplicate_scan = Some(report);
                }
            }
        }
    }

    async fn finish_run(&mut self, kind: RunKind, run: ActiveRun, result: Result<RunSummary, RunFailure>) {
        let (outcome, summary, failure) = match result {
            Ok(summary) if summary.cancelled => (RunOutcome::Cancelled, summary, None),
            Ok(summary) => (RunOutcome::Completed, summary, None),
            Err(RunFailure { error, summary }) => (RunOutcome::Failed, summary, Some(error)),
        };
        let (downloaded, uploaded) = match kind {
            RunKind::Download => (summary.transferred, 0),
            RunKind::Upload => (0, summary.transferred),
        };
        let item = SyncHistoryItem {
            kind,
            started_at: run.started_at,
            finished_at: now_unix(),
            downloaded,
            uploaded,
            skipped: summary.skipped,
            errors: u64::from(failure.is_some()),
            outcome,
        };

        let direction = match kind {
            RunKind::Download => &mut self.snapshot.download,
            RunKind::Upload => &mut self.snapshot.upload,
        };
        direction.active = false;
        let processed = direction.processed;
        direction.status = match (&failure, outcome) {
            (Some(err), _) => format!("{} failed: {err}", capitalized(kind)),
            (None, RunOutcome::Cancelled) => format!("{} cancelled", capitalized(kind)),
            (None, _) => format!(
                "{} finished: {} transferred, {} skipped",
                capitalized(kind),
                summary.transferred,
                summary.skipped
            ),
        };

        if let Some(err) = failure {
            error!(kind = kind.as_str(), processed, error = %err, "run failed");
            if err.is_auth() {
                self.snapshot.last_notice = Some("The server rejected the API key".into());
            }
            self.record_error(kind.as_str(), err.to_string());
        }

        self.history.record(item.clone());
        if let Err(err) = self.history.save().await {
            warn!(error = %err, "failed to save sync history");
        }
        if let Some(responder) = run.responder {
            let _ = responder.send(RunResponse::Finished(item));
        }
    }

    fn record_error(&mut self, context: &'static str, message: String) {
        self.errors.push(now_unix(), context, message);
    }

    fn refresh_snapshot(&mut self) {
        self.snapshot.paused = self.paused;
        self.snapshot.manual_override = self.manual_override;
        self.snapshot.watch_target = self.settings.watch_target();
        self.snapshot.history = self.history.items().cloned().collect();
        self.snapshot.error_count = self.errors.len();
    }

    fn publish(&mut self) {
        self.refresh_snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == self.snapshot {
                false
            } else {
                *current = self.snapshot.clone();
                true
            }
        });
    }
}

impl ActiveRun {
    fn new(cancel: CancellationToken, responder: Option<oneshot::Sender<RunResponse>>) -> Self {
        Self {
            cancel,
            started_at: now_unix(),
            started: Instant::now(),
            responder,
        }
    }
}

fn refuse(responder: Option<oneshot::Sender<RunResponse>>, reason: String) {
    if let Some(responder) = responder {
        let _ = responder.send(RunResponse::Refused(reason));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn capitalized(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Download => "Download",
        RunKind::Upload => "Upload",
    }
}

fn status_text(kind: RunKind, stage: Stage, summary: &RunSummary, current: Option<&str>) -> String {
    let mut text = format!("{}: {}", capitalized(kind), stage.as_str());
    match summary.total {
        Some(total) => text.push_str(&format!(" {} of {total}", summary.processed)),
        None if summary.processed > 0 => text.push_str(&format!(" {}", summary.processed)),
        None => {}
    }
    if let Some(current) = current {
        text.push_str(&format!(" ({current})"));
    }
    text
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
