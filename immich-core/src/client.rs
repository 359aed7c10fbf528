use std::fmt;
use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

const API_SUFFIX: &str = "/api";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum ImmichError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("server url is missing or invalid: {0:?}")]
    InvalidServerUrl(String),
    #[error("api key is missing")]
    MissingApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Normalizes a user-supplied server address to the API root, e.g.
/// `https://photos.example` and `https://photos.example/api/` both become
/// `https://photos.example/api`.
pub fn normalize_base_url(server: &str) -> Result<String, ImmichError> {
    let trimmed = server.trim().trim_end_matches('/');
    let root = trimmed.strip_suffix(API_SUFFIX).unwrap_or(trimmed);
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return Err(ImmichError::InvalidServerUrl(server.to_string()));
    }
    let parsed = Url::parse(root).map_err(|_| ImmichError::InvalidServerUrl(server.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ImmichError::InvalidServerUrl(server.to_string()));
    }
    Ok(format!("{root}{API_SUFFIX}"))
}

#[derive(Clone)]
pub struct ImmichClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for ImmichClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmichClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ImmichClient {
    pub fn new(server_url: &str, api_key: impl Into<String>) -> Result<Self, ImmichError> {
        Self::with_http(Client::new(), server_url, api_key)
    }

    pub fn with_http(
        http: Client,
        server_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, ImmichError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ImmichError::MissingApiKey);
        }
        let normalized = normalize_base_url(server_url)?;
        // Trailing slash so relative joins land under /api.
        let base_url = Url::parse(&format!("{normalized}/"))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub async fn list_assets_page(
        &self,
        page: u32,
        filter: &SearchFilter,
    ) -> Result<AssetPage, ImmichError> {
        let body = SearchRequest {
            page: page.max(1),
            size: filter.page_size.max(1),
            asset_type: filter.asset_type,
            with_deleted: filter.with_deleted,
        };
        let response = self
            .request(Method::POST, "search/metadata")?
            .json(&body)
            .send()
            .await?;
        let payload: SearchResponse = Self::handle_response(response).await?;
        Ok(AssetPage {
            items: payload.assets.items,
            total: payload.assets.total,
        })
    }

    pub async fn list_albums(&self) -> Result<Vec<Album>, ImmichError> {
        let response = self.request(Method::GET, "albums")?.send().await?;
        Self::handle_response(response).await
    }

    pub async fn list_album_assets(&self, album_id: &str) -> Result<Vec<AssetSummary>, ImmichError> {
        let response = self
            .request(Method::GET, &format!("albums/{album_id}"))?
            .send()
            .await?;
        let album: AlbumDetail = Self::handle_response(response).await?;
        Ok(album.assets)
    }

    /// Starts retrieval of the original bytes of an asset. The caller owns
    /// streaming and deadline enforcement.
    pub async fn fetch_asset_original(&self, asset_id: &str) -> Result<Response, ImmichError> {
        let response = self
            .request(Method::GET, &format!("assets/{asset_id}/original"))?
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    pub async fn fetch_asset_metadata(&self, asset_id: &str) -> Result<AssetMetadata, ImmichError> {
        let response = self
            .request(Method::GET, &format!("assets/{asset_id}/metadata"))?
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let raw = response.text().await?;
        AssetMetadata::parse(raw)
    }

    pub async fn upload_asset(&self, upload: &UploadRequest<'_>) -> Result<UploadedAsset, ImmichError> {
        let file = tokio::fs::File::open(upload.path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size)
            .file_name(upload.file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("deviceAssetId", upload.device_asset_id.to_string())
            .text("deviceId", upload.device_id.to_string())
            .text("fileCreatedAt", upload.file_created_at.to_string())
            .text("fileModifiedAt", upload.file_modified_at.to_string())
            .text("filename", upload.file_name.to_string())
            .part("assetData", part);
        let response = self
            .request(Method::POST, "assets")?
            .multipart(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn bulk_duplicate_check(
        &self,
        candidates: &[DuplicateCandidate],
    ) -> Result<Vec<DuplicateVerdict>, ImmichError> {
        let response = self
            .request(Method::POST, "assets/bulk-duplicate-check")?
            .json(&BulkDuplicateRequest { assets: candidates })
            .send()
            .await?;
        let payload: BulkDuplicateResponse = Self::handle_response(response).await?;
        Ok(payload.results)
    }

    pub async fn server_about(&self) -> Result<ServerAbout, ImmichError> {
        let response = self.request(Method::GET, "server/about")?.send().await?;
        Self::handle_response(response).await
    }

    pub async fn server_version(&self) -> Result<ServerVersion, ImmichError> {
        let response = self.request(Method::GET, "server/version")?.send().await?;
        Self::handle_response(response).await
    }

    /// Issues a lightweight request and reports the status code without
    /// treating non-2xx as an error. Transport failures still surface.
    pub async fn probe(
        &self,
        method: Method,
        path: &str,
        body: ProbeBody,
    ) -> Result<StatusCode, ImmichError> {
        let builder = self.request(method, path)?;
        let builder = match body {
            ProbeBody::Empty => builder,
            ProbeBody::Json(value) => builder.json(&value),
            ProbeBody::EmptyMultipart => builder.multipart(Form::new()),
        };
        let response = builder.send().await?;
        Ok(response.status())
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ImmichError> {
        let url = self.endpoint(path)?;
        Ok(self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("accept", "application/json"))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ImmichError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, ImmichError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn ensure_success(response: Response) -> Result<Response, ImmichError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let textual = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(is_textual_content_type)
            .unwrap_or(true);
        let body = response.bytes().await.ok();
        let message = body
            .filter(|_| textual)
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Err(ImmichError::Api { status, message })
    }
}

impl ImmichError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ImmichError::Api { status, .. } => Some(*status),
            ImmichError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ImmichError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ImmichError::Request(_) => true,
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

pub fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn is_textual_content_type(value: &str) -> bool {
    let value = value.to_ascii_lowercase();
    value.starts_with("text/") || value.contains("json") || value.contains("xml")
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Image,
    Video,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub id: String,
    #[serde(default)]
    pub original_file_name: Option<String>,
    #[serde(rename = "type", default = "default_asset_type")]
    pub asset_type: AssetType,
    #[serde(default)]
    pub is_trashed: bool,
    #[serde(default)]
    pub file_created_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl AssetSummary {
    /// Capture time of the asset, preferring the file's own creation date.
    pub fn created(&self) -> Option<&str> {
        self.file_created_at
            .as_deref()
            .or(self.created_at.as_deref())
    }
}

fn default_asset_type() -> AssetType {
    AssetType::Other
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    #[serde(rename = "albumName")]
    pub name: String,
    #[serde(default)]
    pub asset_count: u64,
}

#[derive(Debug, Deserialize)]
struct AlbumDetail {
    #[serde(default)]
    assets: Vec<AssetSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub page_size: u32,
    pub asset_type: Option<AssetType>,
    pub with_deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    page: u32,
    size: u32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    asset_type: Option<AssetType>,
    with_deleted: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    assets: SearchAssets,
}

#[derive(Debug, Deserialize)]
struct SearchAssets {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    items: Vec<AssetSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPage {
    pub items: Vec<AssetSummary>,
    pub total: Option<u64>,
}

/// Metadata document of one asset, kept verbatim for sidecar files.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetMetadata {
    pub raw: String,
    pub checksum: Option<String>,
    pub file_size: Option<u64>,
}

impl AssetMetadata {
    pub fn parse(raw: String) -> Result<Self, ImmichError> {
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let checksum = value
            .get("checksum")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let file_size = value
            .pointer("/exifInfo/fileSizeInByte")
            .or_else(|| value.get("fileSizeInByte"))
            .or_else(|| value.get("fileSize"))
            .and_then(|v| v.as_u64());
        Ok(Self {
            raw,
            checksum,
            file_size,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub device_asset_id: &'a str,
    pub device_id: &'a str,
    pub file_created_at: &'a str,
    pub file_modified_at: &'a str,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Created,
    Duplicate,
    Replaced,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadedAsset {
    pub id: String,
    #[serde(default)]
    pub status: Option<UploadStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub device_asset_id: String,
    pub device_id: String,
    pub file_created_at: String,
    pub file_modified_at: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
struct BulkDuplicateRequest<'a> {
    assets: &'a [DuplicateCandidate],
}

#[derive(Debug, Deserialize)]
struct BulkDuplicateResponse {
    #[serde(default)]
    results: Vec<DuplicateVerdict>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateVerdict {
    pub id: String,
    pub action: DuplicateAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

impl DuplicateVerdict {
    pub fn is_duplicate(&self) -> bool {
        self.action == DuplicateAction::Reject
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerAbout {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub licensed: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone)]
pub enum ProbeBody {
    Empty,
    Json(serde_json::Value),
    EmptyMultipart,
}
