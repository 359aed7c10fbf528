use std::io;
use std::path::{Path, PathBuf};

use immich_core::ImmichError;
use thiserror::Error;

use super::index::IndexError;
use super::progress::RunSummary;
use super::transfer::TransferError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] ImmichError),
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("verification failed for asset {asset_id}: {failure}")]
    Verification {
        asset_id: String,
        failure: VerificationFailure,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("filesystem error on {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// A run that stopped on an error, with the counters reached before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: SyncError,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    Size { expected: u64, actual: u64 },
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
}

impl SyncError {
    pub fn filesystem(path: &Path, source: io::Error) -> Self {
        SyncError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Remote(err) if err.is_auth())
    }
}

impl From<TransferError> for SyncError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Remote(err) => SyncError::Remote(err),
            TransferError::Request(err) => SyncError::Remote(ImmichError::Request(err)),
            TransferError::Io { path, source } => SyncError::Filesystem { path, source },
            TransferError::Timeout { seconds } => SyncError::Timeout { seconds },
        }
    }
}
