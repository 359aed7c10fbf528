use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::sync::coordinator::{
    Command, Coordinator, EngineHandle, Ledgers, RunResponse, WatchTarget,
};
use crate::sync::duplicates::{DuplicateScanReport, DuplicateScanner};
use crate::sync::history::{RunKind, SyncHistoryItem};
use crate::sync::local_watcher::{FolderChange, FolderWatcher, NotifyFolderWatcher, WatchSubscription};
use crate::sync::probe::{ConnectionProbe, ProbeReport};

pub struct DaemonRuntime {
    config: SyncConfig,
    handle: EngineHandle,
    task: JoinHandle<()>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.state_dir)
            .await
            .with_context(|| format!("failed to create state dir at {:?}", config.state_dir))?;
        let ledgers = Ledgers::load(&config.state_paths())
            .await
            .context("failed to load sync state")?;
        let client = match config.client() {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "server connection is not configured");
                None
            }
        };
        let (handle, task) = Coordinator::spawn(config.engine_settings(), client, ledgers);
        Ok(Self {
            config,
            handle,
            task,
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Long-running mode: folder watcher, periodic pull and an initial probe
    /// until Ctrl-C. SIGHUP reloads the configuration from the environment.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            download_dir = %self.config.download.base_dir.display(),
            upload_dir = ?self.config.upload.as_ref().map(|u| u.watch_dir.display().to_string()),
            state_dir = %self.config.state_dir.display(),
            "daemon started"
        );

        let watcher = NotifyFolderWatcher;
        let mut watch: Option<(WatchTarget, WatchSubscription)> = None;
        let mut snapshots = self.handle.subscribe();
        let mut last_notice: Option<String> = None;
        let mut ticker = download_ticker(self.config.download_interval, true);
        let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        self.handle.send(Command::Probe);
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            reconcile_watcher(&watcher, &mut watch, snapshot.watch_target);
            if snapshot.last_notice != last_notice {
                if let Some(notice) = &snapshot.last_notice {
                    info!(notice = %notice, "engine notice");
                }
                last_notice = snapshot.last_notice;
            }

            tokio::select! {
                res = &mut shutdown => {
                    res.context("failed waiting for shutdown signal")?;
                    info!("shutdown requested");
                    break;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        warn!("coordinator stopped unexpectedly");
                        break;
                    }
                }
                Some(change) = next_change(&mut watch) => {
                    debug!(paths = change.paths.len(), "watched folder changed");
                    self.handle.send(Command::FolderChanged);
                }
                _ = next_tick(&mut ticker) => {
                    self.handle.start_download();
                }
                _ = hangup.recv() => {
                    match SyncConfig::from_env() {
                        Ok(config) => {
                            if self.apply_config(config) {
                                ticker = download_ticker(self.config.download_interval, false);
                            }
                        }
                        Err(err) => warn!(error = %err, "configuration reload failed"),
                    }
                }
            }
        }

        drop(watch);
        self.stop().await;
        Ok(())
    }

    /// Pushes a reloaded configuration into the engine and keeps it as the
    /// baseline for the next reload. Returns `true` if the pull interval changed.
    fn apply_config(&mut self, config: SyncConfig) -> bool {
        info!("configuration reloaded");
        if config.server_url != self.config.server_url || config.api_key != self.config.api_key {
            if let (Some(server_url), Some(api_key)) = (config.server_url.clone(), config.api_key.clone()) {
                self.handle.send(Command::UpdateCredentials {
                    server_url,
                    api_key,
                });
            }
        }
        self.handle
            .send(Command::Reconfigure(Box::new(config.engine_settings())));
        let interval_changed = config.download_interval != self.config.download_interval;
        self.config = config;
        interval_changed
    }

    pub async fn run_once(&self, kind: RunKind) -> anyhow::Result<SyncHistoryItem> {
        match self.handle.run_to_completion(kind).await {
            RunResponse::Finished(item) => Ok(item),
            RunResponse::Refused(reason) => anyhow::bail!("{} not started: {reason}", kind.as_str()),
        }
    }

    pub async fn probe(&self) -> anyhow::Result<ProbeReport> {
        let client = self.config.client()?;
        ConnectionProbe::new(client)
            .run(&CancellationToken::new())
            .await
            .context("probe was cancelled")
    }

    pub async fn scan_duplicates(&self) -> anyhow::Result<DuplicateScanReport> {
        let upload = self
            .config
            .upload
            .as_ref()
            .context("IMMICH_UPLOAD_DIR is not set")?;
        DuplicateScanner::default()
            .scan(&upload.watch_dir, &CancellationToken::new())
            .await
            .context("duplicate scan was cancelled")
    }

    pub async fn write_error_log(&self, path: &Path) -> anyhow::Result<()> {
        let exported = self.handle.export_errors().await.unwrap_or_default();
        tokio::fs::write(path, exported)
            .await
            .with_context(|| format!("failed to write error log to {}", path.display()))
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        if let Err(err) = self.task.await {
            warn!(error = %err, "coordinator task failed");
        }
    }
}

/// Clears the duplicate cache without starting the engine.
pub async fn clear_duplicate_cache(config: &SyncConfig) -> anyhow::Result<()> {
    let mut ledgers = Ledgers::load(&config.state_paths())
        .await
        .context("failed to load sync state")?;
    ledgers.duplicates.clear();
    ledgers.duplicates.save().await?;
    Ok(())
}

/// Forgets every downloaded ID, uploaded path, duplicate verdict and run.
pub async fn reset_state(config: &SyncConfig) -> anyhow::Result<()> {
    let mut ledgers = Ledgers::load(&config.state_paths())
        .await
        .context("failed to load sync state")?;
    ledgers.download.clear();
    ledgers.download.save().await?;
    ledgers.upload.clear();
    ledgers.upload.save().await?;
    ledgers.duplicates.clear();
    ledgers.duplicates.save().await?;
    ledgers.history.clear();
    ledgers.history.save().await?;
    Ok(())
}

fn reconcile_watcher(
    watcher: &dyn FolderWatcher,
    current: &mut Option<(WatchTarget, WatchSubscription)>,
    wanted: Option<WatchTarget>,
) {
    if current.as_ref().map(|(target, _)| target) == wanted.as_ref() {
        return;
    }
    *current = None;
    let Some(target) = wanted else {
        info!("folder watcher stopped");
        return;
    };
    match watcher.watch(&target.path, target.recursive) {
        Ok(subscription) => {
            info!(path = %target.path.display(), recursive = target.recursive, "watching upload folder");
            *current = Some((target, subscription));
        }
        Err(err) => warn!(error = %err, "failed to start folder watcher"),
    }
}

async fn next_change(watch: &mut Option<(WatchTarget, WatchSubscription)>) -> Option<FolderChange> {
    match watch {
        Some((_, subscription)) => subscription.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Periodic pull timer. A rebuilt timer waits a full period before its
/// first tick.
fn download_ticker(period: Option<Duration>, immediate: bool) -> Option<Interval> {
    let period = period?;
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
