use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use immich_core::{AssetMetadata, AssetSummary, AssetType, SearchFilter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{RunFailure, SyncError, VerificationFailure};
use super::index::DownloadIndex;
use super::paths::{FolderStructure, destination_for, sidecar_path_for};
use super::progress::{ProgressReporter, RunSummary, Stage};
use super::retry::RetryPolicy;
use super::throttle::Throttle;
use super::transfer::{TransferClient, file_checksum, partial_path};

pub const PAGE_SIZE: u32 = 100;
pub const FLUSH_EVERY: u64 = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub base_dir: PathBuf,
    pub include_photos: bool,
    pub include_videos: bool,
    pub skip_trashed: bool,
    pub album_ids: Vec<String>,
    pub organize_by_album: bool,
    pub folder_structure: FolderStructure,
    pub verify_checksums: bool,
    pub write_sidecars: bool,
}

impl DownloadOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            include_photos: true,
            include_videos: true,
            skip_trashed: true,
            album_ids: Vec::new(),
            organize_by_album: false,
            folder_structure: FolderStructure::Flat,
            verify_checksums: false,
            write_sidecars: false,
        }
    }

    fn wants(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::Image => self.include_photos,
            AssetType::Video => self.include_videos,
            AssetType::Other => self.include_photos && self.include_videos,
        }
    }

    fn search_filter(&self) -> SearchFilter {
        let asset_type = match (self.include_photos, self.include_videos) {
            (true, false) => Some(AssetType::Image),
            (false, true) => Some(AssetType::Video),
            _ => None,
        };
        SearchFilter {
            page_size: PAGE_SIZE,
            asset_type,
            with_deleted: !self.skip_trashed,
        }
    }
}

enum Flow {
    Continue,
    Cancelled,
}

/// Pulls remote assets into the local library folder.
pub struct DownloadPipeline {
    transfer: TransferClient,
    options: DownloadOptions,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl DownloadPipeline {
    pub fn new(transfer: TransferClient, options: DownloadOptions) -> Self {
        Self {
            transfer,
            options,
            retry: RetryPolicy::default(),
            throttle: Throttle::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Runs one pull pass. The index is flushed whatever the outcome; a
    /// cancelled run returns `Ok` with `cancelled` set.
    pub async fn run(
        &self,
        index: &mut DownloadIndex,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<RunSummary, RunFailure> {
        let mut summary = RunSummary::default();
        progress.force(Stage::Preparing, &summary, None);

        let result = self.run_inner(index, cancel, progress, &mut summary).await;
        let flushed = index.save().await;
        let result = match (result, flushed) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(flush_err)) => Err(flush_err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(flush_err)) => {
                warn!(error = %flush_err, "failed to flush download index after error");
                Err(err)
            }
        };

        match result {
            Ok(()) => {
                let stage = if summary.cancelled {
                    Stage::Cancelled
                } else {
                    Stage::Completed
                };
                progress.force(stage, &summary, None);
                info!(
                    downloaded = summary.transferred,
                    skipped = summary.skipped,
                    bytes = summary.bytes,
                    cancelled = summary.cancelled,
                    "download run finished"
                );
                Ok(summary)
            }
            Err(error) => {
                progress.force(Stage::Failed, &summary, None);
                Err(RunFailure { error, summary })
            }
        }
    }

    async fn run_inner(
        &self,
        index: &mut DownloadIndex,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        if !self.options.include_photos && !self.options.include_videos {
            return Err(SyncError::Configuration(
                "neither photos nor videos are selected for download".into(),
            ));
        }
        let base = &self.options.base_dir;
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|source| SyncError::filesystem(base, source))?;

        progress.force(Stage::Enumerating, summary, None);
        if self.options.album_ids.is_empty() {
            self.run_library(index, cancel, progress, summary).await
        } else {
            self.run_albums(index, cancel, progress, summary).await
        }
    }

    async fn run_library(
        &self,
        index: &mut DownloadIndex,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        let client = self.transfer.client();
        let filter = self.options.search_filter();
        let mut page = 1u32;
        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            let result = self
                .retry
                .run("search assets", |_| client.list_assets_page(page, &filter))
                .await?;
            if result.items.is_empty() {
                return Ok(());
            }
            let page_total = result.total.unwrap_or(result.items.len() as u64);
            summary.total = Some(summary.total.unwrap_or(0) + page_total);
            debug!(page, count = result.items.len(), "fetched asset page");

            for asset in &result.items {
                if let Flow::Cancelled = self
                    .process_asset(asset, None, index, cancel, progress, summary)
                    .await?
                {
                    summary.cancelled = true;
                    return Ok(());
                }
            }
            page += 1;
        }
    }

    async fn run_albums(
        &self,
        index: &mut DownloadIndex,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        let Some(assets) = self.enumerate_albums(cancel).await? else {
            summary.cancelled = true;
            return Ok(());
        };
        summary.total = Some(assets.len() as u64);

        for (asset, album) in &assets {
            if let Flow::Cancelled = self
                .process_asset(asset, album.as_deref(), index, cancel, progress, summary)
                .await?
            {
                summary.cancelled = true;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Assets of the selected albums, each attributed to the first album that
    /// lists it. `None` if cancelled while listing.
    async fn enumerate_albums(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<(AssetSummary, Option<String>)>>, SyncError> {
        let client = self.transfer.client();
        let names: HashMap<String, String> = if self.options.organize_by_album {
            self.retry
                .run("list albums", |_| client.list_albums())
                .await?
                .into_iter()
                .map(|album| (album.id, album.name))
                .collect()
        } else {
            HashMap::new()
        };

        let mut seen = HashSet::new();
        let mut assets = Vec::new();
        for album_id in &self.options.album_ids {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let listed = self
                .retry
                .run("list album assets", |_| client.list_album_assets(album_id))
                .await?;
            let album_name = self
                .options
                .organize_by_album
                .then(|| names.get(album_id).cloned().unwrap_or_else(|| album_id.clone()));
            debug!(album = %album_id, count = listed.len(), "fetched album assets");
            for asset in listed {
                if seen.insert(asset.id.clone()) {
                    assets.push((asset, album_name.clone()));
                }
            }
        }
        Ok(Some(assets))
    }

    async fn process_asset(
        &self,
        asset: &AssetSummary,
        album: Option<&str>,
        index: &mut DownloadIndex,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<Flow, SyncError> {
        if cancel.is_cancelled() {
            return Ok(Flow::Cancelled);
        }
        summary.processed += 1;
        if (self.options.skip_trashed && asset.is_trashed) || !self.options.wants(asset.asset_type) {
            summary.filtered += 1;
            return Ok(Flow::Continue);
        }

        let current = asset.original_file_name.as_deref().unwrap_or(&asset.id);
        progress.report(Stage::Checking, summary, Some(current));
        let destination = destination_for(
            &self.options.base_dir,
            asset,
            album,
            self.options.folder_structure,
        );
        if index.contains(&asset.id) {
            debug!(asset = %asset.id, "already indexed, skipping");
            summary.skipped += 1;
            return Ok(Flow::Continue);
        }
        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            debug!(asset = %asset.id, path = %destination.display(), "destination exists, indexing");
            index.insert(asset.id.clone());
            summary.skipped += 1;
            return Ok(Flow::Continue);
        }

        progress.report(Stage::Transferring, summary, Some(current));
        let transferred = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tokio::fs::remove_file(partial_path(&destination)).await;
                return Ok(Flow::Cancelled);
            }
            result = self.retry.run("download asset", |_| {
                self.transfer.download_asset(&asset.id, &destination)
            }) => result?,
        };

        if transferred == 0 {
            debug!(asset = %asset.id, "destination appeared during transfer");
            index.insert(asset.id.clone());
            summary.skipped += 1;
            return Ok(Flow::Continue);
        }
        summary.bytes += transferred;

        if !self.throttle.pace(transferred, cancel).await {
            return self.stop_after_transfer(asset, &destination, index, summary).await;
        }
        if self.needs_post_processing() {
            let post = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.post_process(asset, &destination, transferred, progress, summary) => Some(result),
            };
            match post {
                Some(result) => result?,
                None => return self.stop_after_transfer(asset, &destination, index, summary).await,
            }
        }

        progress.report(Stage::Indexing, summary, Some(current));
        index.insert(asset.id.clone());
        summary.transferred += 1;
        if summary.transferred % FLUSH_EVERY == 0 {
            index.save().await?;
        }
        Ok(Flow::Continue)
    }

    fn needs_post_processing(&self) -> bool {
        self.options.verify_checksums || self.options.write_sidecars
    }

    /// Cancellation between transfer and indexing. A file that still owes
    /// verification or a sidecar is discarded so the next run fetches it again.
    async fn stop_after_transfer(
        &self,
        asset: &AssetSummary,
        destination: &Path,
        index: &mut DownloadIndex,
        summary: &mut RunSummary,
    ) -> Result<Flow, SyncError> {
        if self.needs_post_processing() {
            debug!(asset = %asset.id, "cancelled before post-processing, discarding file");
            let _ = tokio::fs::remove_file(destination).await;
            let _ = tokio::fs::remove_file(sidecar_path_for(destination)).await;
        } else {
            index.insert(asset.id.clone());
            summary.transferred += 1;
        }
        Ok(Flow::Cancelled)
    }

    async fn post_process(
        &self,
        asset: &AssetSummary,
        destination: &Path,
        transferred: u64,
        progress: &mut ProgressReporter,
        summary: &RunSummary,
    ) -> Result<(), SyncError> {
        let client = self.transfer.client();
        let metadata = match self
            .retry
            .run("fetch metadata", |_| client.fetch_asset_metadata(&asset.id))
            .await
        {
            Ok(metadata) => metadata,
            Err(err) if !self.options.verify_checksums => {
                warn!(asset = %asset.id, error = %err, "metadata unavailable, sidecar skipped");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        if self.options.verify_checksums {
            progress.report(Stage::Verifying, summary, Some(&asset.id));
            if let Err(err) = verify(&asset.id, destination, transferred, &metadata).await {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(err);
            }
        }
        if self.options.write_sidecars {
            progress.report(Stage::WritingSidecar, summary, Some(&asset.id));
            let sidecar = sidecar_path_for(destination);
            if let Err(err) = tokio::fs::write(&sidecar, metadata.raw.as_bytes()).await {
                warn!(path = %sidecar.display(), error = %err, "failed to write sidecar");
            }
        }
        Ok(())
    }
}

/// Compares the written file against the server-reported size and checksum.
/// Whichever of the two the server omits is not checked.
async fn verify(
    asset_id: &str,
    path: &Path,
    written: u64,
    metadata: &AssetMetadata,
) -> Result<(), SyncError> {
    if let Some(expected) = metadata.file_size
        && expected != written
    {
        return Err(SyncError::Verification {
            asset_id: asset_id.to_string(),
            failure: VerificationFailure::Size {
                expected,
                actual: written,
            },
        });
    }
    if let Some(expected) = metadata.checksum.as_deref() {
        let actual = file_checksum(path)
            .await
            .map_err(|source| SyncError::filesystem(path, source))?;
        if actual != expected {
            return Err(SyncError::Verification {
                asset_id: asset_id.to_string(),
                failure: VerificationFailure::Checksum {
                    expected: expected.to_string(),
                    actual,
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
