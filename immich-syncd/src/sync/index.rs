use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const DOWNLOAD_INDEX_FILE: &str = "download-index.json";
const UPLOAD_INDEX_FILE: &str = "upload-index.json";
const DUPLICATE_CACHE_FILE: &str = "duplicate-cache.json";
const HISTORY_FILE: &str = "sync-history.json";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// Locations of the ledgers inside the application state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> Result<PathBuf, IndexError> {
        let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
        path.push("immich-sync");
        Ok(path)
    }

    pub fn download_index(&self) -> PathBuf {
        self.root.join(DOWNLOAD_INDEX_FILE)
    }

    pub fn upload_index(&self) -> PathBuf {
        self.root.join(UPLOAD_INDEX_FILE)
    }

    pub fn duplicate_cache(&self) -> PathBuf {
        self.root.join(DUPLICATE_CACHE_FILE)
    }

    pub fn history(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }
}

/// Reads a JSON ledger. A missing file is empty; an unreadable document is
/// logged and treated as empty so a damaged ledger never blocks startup.
pub(crate) async fn read_json_or_default<T>(path: &Path) -> Result<T, IndexError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(IndexError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ledger is unreadable, starting empty");
            Ok(T::default())
        }
    }
}

/// Replaces `path` with the JSON encoding of `value` via a temp sibling and
/// rename, so readers see either the old or the new document.
pub(crate) async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), IndexError>
where
    T: Serialize + ?Sized,
{
    let io_err = |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| IndexError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let temp = temp_path(path);
    let mut file = tokio::fs::File::create(&temp).await.map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);
    if let Err(err) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(io_err(err));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Asset IDs already materialized locally. Entries are never removed when a
/// local file disappears.
#[derive(Debug, Clone)]
pub struct DownloadIndex {
    path: PathBuf,
    ids: HashSet<String>,
}

impl DownloadIndex {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let ids: Vec<String> = read_json_or_default(&path).await?;
        Ok(Self {
            path,
            ids: ids.into_iter().collect(),
        })
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.ids.contains(asset_id)
    }

    pub fn insert(&mut self, asset_id: impl Into<String>) -> bool {
        self.ids.insert(asset_id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self) -> Result<(), IndexError> {
        let mut ids: Vec<&String> = self.ids.iter().collect();
        ids.sort();
        write_json_atomic(&self.path, &ids).await
    }
}

impl PartialEq for DownloadIndex {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

/// Local absolute path to the remote asset it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadIndex {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl UploadIndex {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let entries = read_json_or_default(&path).await?;
        Ok(Self { path, entries })
    }

    pub fn contains(&self, local_path: &Path) -> bool {
        self.entries.contains_key(&path_key(local_path))
    }

    pub fn asset_for(&self, local_path: &Path) -> Option<&str> {
        self.entries.get(&path_key(local_path)).map(String::as_str)
    }

    /// Records an upload. The first recorded asset for a path wins.
    pub fn insert(&mut self, local_path: &Path, asset_id: impl Into<String>) -> bool {
        let key = path_key(local_path);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, asset_id.into());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub async fn save(&self) -> Result<(), IndexError> {
        write_json_atomic(&self.path, &self.entries).await
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Fingerprint key to "server already has this" verdicts.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCache {
    path: PathBuf,
    verdicts: BTreeMap<String, bool>,
}

impl DuplicateCache {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let verdicts = read_json_or_default(&path).await?;
        Ok(Self { path, verdicts })
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.verdicts.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, is_duplicate: bool) {
        self.verdicts.insert(key.into(), is_duplicate);
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn clear(&mut self) {
        self.verdicts.clear();
    }

    pub async fn save(&self) -> Result<(), IndexError> {
        write_json_atomic(&self.path, &self.verdicts).await
    }
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
