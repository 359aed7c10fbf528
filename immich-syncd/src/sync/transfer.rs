use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use immich_core::{ImmichClient, ImmichError};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::retry::Retryable;

pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
const HASH_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote error: {0}")]
    Remote(#[from] ImmichError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transfer timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Remote(err) => err.is_retryable(),
            TransferError::Request(_) | TransferError::Timeout { .. } => true,
            TransferError::Io { .. } => false,
        }
    }
}

/// Streams asset originals to disk under a deadline.
#[derive(Clone, Debug)]
pub struct TransferClient {
    client: ImmichClient,
    timeout: Duration,
}

impl TransferClient {
    pub fn new(client: ImmichClient) -> Self {
        Self::with_timeout(client, DEFAULT_TRANSFER_TIMEOUT)
    }

    pub fn with_timeout(client: ImmichClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client(&self) -> &ImmichClient {
        &self.client
    }

    /// Downloads the original of `asset_id` to `target` and returns the byte
    /// count. If `target` appears while the download is in flight the fetched
    /// data is discarded and 0 is returned.
    pub async fn download_asset(&self, asset_id: &str, target: &Path) -> Result<u64, TransferError> {
        let partial = partial_path(target);
        let result = match tokio::time::timeout(
            self.timeout,
            self.download_to_partial(asset_id, target, &partial),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }

    async fn download_to_partial(
        &self,
        asset_id: &str,
        target: &Path,
        partial: &Path,
    ) -> Result<u64, TransferError> {
        let response = self.client.fetch_asset_original(asset_id).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|source| io_error(partial, source))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(partial, source))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|source| io_error(partial, source))?;
        file.sync_all()
            .await
            .map_err(|source| io_error(partial, source))?;
        drop(file);

        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(partial).await;
            return Ok(0);
        }
        tokio::fs::rename(partial, target)
            .await
            .map_err(|source| io_error(target, source))?;
        Ok(written)
    }
}

/// Base64 SHA-1 of a file, the checksum format the server reports.
pub async fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; HASH_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

fn io_error(path: &Path, source: io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transfer_for(server: &MockServer) -> TransferClient {
        TransferClient::new(ImmichClient::new(&server.uri(), "test-key").unwrap())
    }

    #[tokio::test]
    async fn downloads_asset_to_target_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/assets/a1/original"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/a1-out.jpg");
        let bytes = transfer_for(&server)
            .download_asset("a1", &target)
            .await
            .unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn existing_destination_is_not_overwritten() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/assets/a1/original"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new-bytes"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("a1-out.jpg");
        std::fs::write(&target, b"").unwrap();

        let bytes = transfer_for(&server)
            .download_asset("a1", &target)
            .await
            .unwrap();

        assert_eq!(bytes, 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn times_out_and_cleans_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/assets/slow/original"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("slow.jpg");
        let transfer = TransferClient::with_timeout(
            ImmichClient::new(&server.uri(), "test-key").unwrap(),
            Duration::from_millis(50),
        );

        let err = transfer.download_asset("slow", &target).await.unwrap_err();
        assert!(matches!(err, TransferError::Timeout { .. }));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn remote_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/assets/gone/original"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let err = transfer_for(&server)
            .download_asset("gone", &dir.path().join("gone.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Remote(ImmichError::Api { status, .. }) if status.as_u16() == 404
        ));
    }

    #[tokio::test]
    async fn checksum_is_base64_sha1() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello").unwrap();
        assert_eq!(
            file_checksum(&file).await.unwrap(),
            "qvTGHdzF6KLavt4PO0gs2a6pQ00="
        );
    }

    #[test]
    fn partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/tmp/a.jpg")),
            PathBuf::from("/tmp/a.jpg.partial")
        );
        assert_eq!(
            partial_path(Path::new("/tmp/a")),
            PathBuf::from("/tmp/a.partial")
        );
    }
}
