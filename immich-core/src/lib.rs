mod client;

pub use client::{
    Album, ApiErrorClass, AssetMetadata, AssetPage, AssetSummary, AssetType, DuplicateAction,
    DuplicateCandidate, DuplicateVerdict, ImmichClient, ImmichError, ProbeBody, SearchFilter,
    ServerAbout, ServerVersion, UploadRequest, UploadStatus, UploadedAsset, classify_api_status,
    normalize_base_url,
};
pub use reqwest::{Method, StatusCode};
