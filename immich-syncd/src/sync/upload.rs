use std::fs::Metadata;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use immich_core::{DuplicateCandidate, ImmichClient, UploadRequest, UploadStatus};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::error::{RunFailure, SyncError};
use super::index::{DuplicateCache, UploadIndex};
use super::progress::{ProgressReporter, RunSummary, Stage};
use super::retry::RetryPolicy;
use super::throttle::Throttle;
use super::transfer::file_checksum;

pub const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "gif", "webp", "tif", "tiff", "bmp", "dng", "raw",
    "cr2", "cr3", "nef", "arw", "orf", "rw2", "raf", "srw", "avif", "jxl",
];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "3gp", "webm", "mts", "m2ts", "wmv", "mpg", "mpeg",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub watch_dir: PathBuf,
    pub include_photos: bool,
    pub include_videos: bool,
    pub include_subfolders: bool,
    pub allowed_extensions: Vec<String>,
    pub denied_extensions: Vec<String>,
    pub server_duplicate_check: bool,
    pub device_id: String,
}

impl UploadOptions {
    pub fn new(watch_dir: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            include_photos: true,
            include_videos: true,
            include_subfolders: true,
            allowed_extensions: Vec::new(),
            denied_extensions: Vec::new(),
            server_duplicate_check: false,
            device_id: device_id.into(),
        }
    }

    /// Whether a file with this extension is eligible for upload. A non-empty
    /// allow-list wins over the deny-list.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        let known = (self.include_photos && PHOTO_EXTENSIONS.contains(&extension.as_str()))
            || (self.include_videos && VIDEO_EXTENSIONS.contains(&extension.as_str()));
        if !known {
            return false;
        }
        if !self.allowed_extensions.is_empty() {
            return self
                .allowed_extensions
                .iter()
                .any(|allowed| normalize_extension(allowed) == extension);
        }
        !self
            .denied_extensions
            .iter()
            .any(|denied| normalize_extension(denied) == extension)
    }
}

pub fn normalize_extension(value: &str) -> String {
    value.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Eligible files under the watched folder in sorted path order. Hidden
/// entries are never descended into.
pub fn discover(options: &UploadOptions) -> Vec<PathBuf> {
    let max_depth = if options.include_subfolders {
        usize::MAX
    } else {
        1
    };
    let mut files: Vec<PathBuf> = WalkDir::new(&options.watch_dir)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| options.accepts_extension(&ext.to_string_lossy()))
        })
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// `"{fileName}-{size}"` with all whitespace removed.
pub fn device_asset_id(file_name: &str, size: u64) -> String {
    format!("{file_name}-{size}")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Hex SHA-256 over the identity of one local file version.
pub fn fingerprint_key(device_asset_id: &str, checksum: &str, size: u64, mtime: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{device_asset_id}|{checksum}|{size}|{mtime}").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

struct LocalFile {
    path: PathBuf,
    file_name: String,
    size: u64,
    mtime: i64,
    device_asset_id: String,
    created_at: String,
    modified_at: String,
}

impl LocalFile {
    fn new(path: PathBuf, metadata: &Metadata) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = metadata.len();
        let modified = metadata.modified().ok();
        let created = metadata.created().ok().or(modified);
        let now = SystemTime::now();
        Self {
            device_asset_id: device_asset_id(&file_name, size),
            mtime: modified
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|since| since.as_secs() as i64)
                .unwrap_or(0),
            created_at: rfc3339(created.unwrap_or(now)),
            modified_at: rfc3339(modified.unwrap_or(now)),
            path,
            file_name,
            size,
        }
    }
}

fn rfc3339(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

enum Flow {
    Continue,
    Cancelled,
}

/// Pushes new files from the watched folder to the server.
pub struct UploadPipeline {
    client: ImmichClient,
    options: UploadOptions,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl UploadPipeline {
    pub fn new(client: ImmichClient, options: UploadOptions) -> Self {
        Self {
            client,
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

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub async fn run(
        &self,
        index: &mut UploadIndex,
        cache: &mut DuplicateCache,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<RunSummary, RunFailure> {
        let mut summary = RunSummary::default();
        progress.force(Stage::Preparing, &summary, None);

        match self
            .run_inner(index, cache, cancel, progress, &mut summary)
            .await
        {
            Ok(()) => {
                let stage = if summary.cancelled {
                    Stage::Cancelled
                } else {
                    Stage::Completed
                };
                progress.force(stage, &summary, None);
                info!(
                    uploaded = summary.transferred,
                    skipped = summary.skipped,
                    server_duplicates = summary.server_duplicates,
                    cancelled = summary.cancelled,
                    "upload run finished"
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
        index: &mut UploadIndex,
        cache: &mut DuplicateCache,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        if !self.options.include_photos && !self.options.include_videos {
            return Err(SyncError::Configuration(
                "neither photos nor videos are selected for upload".into(),
            ));
        }
        let dir = &self.options.watch_dir;
        if !tokio::fs::metadata(dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(SyncError::Configuration(format!(
                "upload folder {} does not exist",
                dir.display()
            )));
        }

        progress.force(Stage::Discovering, summary, None);
        let options = self.options.clone();
        let files = tokio::task::spawn_blocking(move || discover(&options))
            .await
            .map_err(|err| SyncError::filesystem(dir, io::Error::other(err)))?;
        summary.total = Some(files.len() as u64);
        debug!(count = files.len(), "discovered upload candidates");

        for path in files {
            if let Flow::Cancelled = self
                .process_file(path, index, cache, cancel, progress, summary)
                .await?
            {
                summary.cancelled = true;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn process_file(
        &self,
        path: PathBuf,
        index: &mut UploadIndex,
        cache: &mut DuplicateCache,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<Flow, SyncError> {
        if cancel.is_cancelled() {
            return Ok(Flow::Cancelled);
        }
        summary.processed += 1;
        if index.contains(&path) {
            summary.skipped += 1;
            return Ok(Flow::Continue);
        }

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| SyncError::filesystem(&path, source))?;
        let file = LocalFile::new(path, &metadata);
        progress.report(Stage::Checking, summary, Some(&file.file_name));

        if self.options.server_duplicate_check {
            if cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if self.server_has(&file, cache).await? {
                debug!(path = %file.path.display(), "server already has file, skipping");
                summary.server_duplicates += 1;
                summary.skipped += 1;
                return Ok(Flow::Continue);
            }
        }

        if cancel.is_cancelled() {
            return Ok(Flow::Cancelled);
        }
        progress.report(Stage::Transferring, summary, Some(&file.file_name));
        let request = UploadRequest {
            path: &file.path,
            file_name: &file.file_name,
            device_asset_id: &file.device_asset_id,
            device_id: &self.options.device_id,
            file_created_at: &file.created_at,
            file_modified_at: &file.modified_at,
        };
        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Flow::Cancelled),
            result = self.retry.run("upload asset", |_| self.client.upload_asset(&request)) => result?,
        };
        if uploaded.status == Some(UploadStatus::Duplicate) {
            debug!(path = %file.path.display(), asset = %uploaded.id, "server reported duplicate");
        }

        progress.report(Stage::Indexing, summary, Some(&file.file_name));
        index.insert(&file.path, uploaded.id);
        index.save().await?;
        summary.transferred += 1;
        summary.bytes += file.size;

        if !self.throttle.pace(file.size, cancel).await {
            return Ok(Flow::Cancelled);
        }
        Ok(Flow::Continue)
    }

    async fn server_has(&self, file: &LocalFile, cache: &mut DuplicateCache) -> Result<bool, SyncError> {
        let checksum = file_checksum(&file.path)
            .await
            .map_err(|source| SyncError::filesystem(&file.path, source))?;
        let key = fingerprint_key(&file.device_asset_id, &checksum, file.size, file.mtime);
        if let Some(known) = cache.get(&key) {
            return Ok(known);
        }

        let candidates = [DuplicateCandidate {
            device_asset_id: file.device_asset_id.clone(),
            device_id: self.options.device_id.clone(),
            file_created_at: file.created_at.clone(),
            file_modified_at: file.modified_at.clone(),
            filename: file.file_name.clone(),
            size: file.size,
            checksum,
        }];
        let verdicts = self
            .retry
            .run("duplicate check", |_| self.client.bulk_duplicate_check(&candidates))
            .await?;
        let duplicate = verdicts
            .iter()
            .any(|verdict| verdict.id == file.device_asset_id && verdict.is_duplicate());
        cache.insert(key, duplicate);
        cache.save().await?;
        Ok(duplicate)
    }
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
