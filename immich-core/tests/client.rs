use immich_core::{
    AssetType, DuplicateCandidate, ImmichClient, ImmichError, Method, ProbeBody, SearchFilter,
    StatusCode, UploadRequest, UploadStatus,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ImmichClient {
    ImmichClient::new(&server.uri(), "test-key").unwrap()
}

#[tokio::test]
async fn base_url_gets_api_suffix() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    assert_eq!(client.base_url(), format!("{}/api", server.uri()));
}

#[tokio::test]
async fn list_assets_page_sends_api_key_and_paging() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/search/metadata"))
        .and(header("x-api-key", "test-key"))
        .and(body_partial_json(json!({ "page": 2, "size": 100, "type": "VIDEO" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "assets": {
                "total": 101,
                "count": 1,
                "items": [
                    {
                        "id": "asset-1",
                        "originalFileName": "clip.mp4",
                        "type": "VIDEO",
                        "isTrashed": false,
                        "fileCreatedAt": "2023-03-15T00:00:00.000Z"
                    }
                ],
                "nextPage": null
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client
        .list_assets_page(
            2,
            &SearchFilter {
                page_size: 100,
                asset_type: Some(AssetType::Video),
                with_deleted: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(page.total, Some(101));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, "asset-1");
    assert_eq!(page.items[0].original_file_name.as_deref(), Some("clip.mp4"));
    assert_eq!(page.items[0].asset_type, AssetType::Video);
}

#[tokio::test]
async fn list_albums_maps_album_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/albums"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "al-1", "albumName": "Holidays", "assetCount": 12 },
            { "id": "al-2", "albumName": "Family", "assetCount": 3 }
        ])))
        .mount(&server)
        .await;

    let albums = client_for(&server).list_albums().await.unwrap();
    assert_eq!(albums.len(), 2);
    assert_eq!(albums[0].name, "Holidays");
    assert_eq!(albums[0].asset_count, 12);
}

#[tokio::test]
async fn list_album_assets_reads_embedded_assets() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/albums/al-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "al-1",
            "albumName": "Holidays",
            "assets": [
                { "id": "a", "type": "IMAGE", "isTrashed": true },
                { "id": "b", "type": "VIDEO" }
            ]
        })))
        .mount(&server)
        .await;

    let assets = client_for(&server).list_album_assets("al-1").await.unwrap();
    assert_eq!(assets.len(), 2);
    assert!(assets[0].is_trashed);
    assert_eq!(assets[1].asset_type, AssetType::Video);
}

#[tokio::test]
async fn non_success_uses_textual_body_as_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/albums"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"message":"Missing required permission: album.read"}"#),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).list_albums().await.unwrap_err();
    match err {
        ImmichError::Api { status, message } => {
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert!(message.contains("album.read"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_success_without_text_body_reports_http_code() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/assets/a1/original"))
        .respond_with(
            ResponseTemplate::new(502)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(vec![0u8, 159, 146, 150]),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_asset_original("a1")
        .await
        .unwrap_err();
    match err {
        ImmichError::Api { status, message } => {
            assert_eq!(status, StatusCode::BAD_GATEWAY);
            assert_eq!(message, "HTTP 502");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn fetch_asset_metadata_keeps_raw_body() {
    let server = MockServer::start().await;
    let body = r#"{"id":"a1","checksum":"abc=","exifInfo":{"fileSizeInByte":5}}"#;

    Mock::given(method("GET"))
        .and(path("/api/assets/a1/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let meta = client_for(&server).fetch_asset_metadata("a1").await.unwrap();
    assert_eq!(meta.raw, body);
    assert_eq!(meta.checksum.as_deref(), Some("abc="));
    assert_eq!(meta.file_size, Some(5));
}

#[tokio::test]
async fn upload_asset_sends_multipart_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/assets"))
        .and(header("x-api-key", "test-key"))
        .and(body_string_contains("name=\"deviceAssetId\""))
        .and(body_string_contains("photo.jpg-7"))
        .and(body_string_contains("name=\"assetData\""))
        .and(body_string_contains("payload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "remote-1",
            "status": "created"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("photo.jpg");
    std::fs::write(&source, b"payload").unwrap();

    let uploaded = client_for(&server)
        .upload_asset(&UploadRequest {
            path: &source,
            file_name: "photo.jpg",
            device_asset_id: "photo.jpg-7",
            device_id: "test-device",
            file_created_at: "2024-01-01T00:00:00Z",
            file_modified_at: "2024-01-01T00:00:00Z",
        })
        .await
        .unwrap();

    assert_eq!(uploaded.id, "remote-1");
    assert_eq!(uploaded.status, Some(UploadStatus::Created));
}

#[tokio::test]
async fn bulk_duplicate_check_reports_rejections() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/assets/bulk-duplicate-check"))
        .and(body_partial_json(json!({
            "assets": [{ "deviceAssetId": "a.jpg-3", "checksum": "sum", "size": 3 }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "a.jpg-3", "action": "reject", "reason": "duplicate", "assetId": "r-9" }
            ]
        })))
        .mount(&server)
        .await;

    let verdicts = client_for(&server)
        .bulk_duplicate_check(&[DuplicateCandidate {
            device_asset_id: "a.jpg-3".into(),
            device_id: "dev".into(),
            file_created_at: "2024-01-01T00:00:00Z".into(),
            file_modified_at: "2024-01-01T00:00:00Z".into(),
            filename: "a.jpg".into(),
            size: 3,
            checksum: "sum".into(),
        }])
        .await
        .unwrap();

    assert_eq!(verdicts.len(), 1);
    assert!(verdicts[0].is_duplicate());
    assert_eq!(verdicts[0].asset_id.as_deref(), Some("r-9"));
}

#[tokio::test]
async fn server_version_displays_semver() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/server/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "major": 1, "minor": 119, "patch": 1
        })))
        .mount(&server)
        .await;

    let version = client_for(&server).server_version().await.unwrap();
    assert_eq!(version.to_string(), "v1.119.1");
}

#[tokio::test]
async fn probe_reports_status_without_failing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/assets"))
        .respond_with(ResponseTemplate::new(400).set_body_string("assetData is required"))
        .mount(&server)
        .await;

    let status = client_for(&server)
        .probe(Method::POST, "assets", ProbeBody::EmptyMultipart)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
