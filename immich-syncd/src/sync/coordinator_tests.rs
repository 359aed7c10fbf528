use std::fs;

use serde_json::json;
use tempfile::{TempDir, tempdir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::sync::probe::ConnectionStatus;

struct Fixture {
    server: MockServer,
    dir: TempDir,
}

impl Fixture {
    async fn start() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("watch")).unwrap();
        Self {
            server: MockServer::start().await,
            dir,
        }
    }

    fn state(&self) -> StatePaths {
        StatePaths::new(self.dir.path().join("state"))
    }

    fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(DownloadOptions::new(self.dir.path().join("library")));
        settings.upload = Some(UploadOptions::new(self.dir.path().join("watch"), "test-device"));
        settings.retry = RetryPolicy::new(1, Duration::ZERO);
        settings.rescan_debounce = Duration::from_millis(50);
        settings
    }

    fn client(&self) -> ImmichClient {
        ImmichClient::new(&self.server.uri(), "test-key").unwrap()
    }

    async fn spawn(&self, settings: EngineSettings) -> (EngineHandle, JoinHandle<()>) {
        let ledgers = Ledgers::load(&self.state()).await.unwrap();
        Coordinator::spawn(settings, Some(self.client()), ledgers)
    }

    async fn mount_library(&self, items: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/search/metadata"))
            .and(wiremock::matchers::body_partial_json(json!({ "page": 1 })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "assets": { "items": items } })),
            )
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/search/metadata"))
            .and(wiremock::matchers::body_partial_json(json!({ "page": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "assets": { "items": [] } })))
            .mount(&self.server)
            .await;
    }
}

fn asset(id: &str) -> serde_json::Value {
    json!({ "id": id, "originalFileName": format!("{id}.jpg"), "type": "IMAGE" })
}

async fn wait_for(
    handle: &EngineHandle,
    predicate: impl FnMut(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("snapshot condition not reached")
        .unwrap()
        .clone();
    snapshot
}

#[tokio::test]
async fn download_run_is_recorded_in_history() {
    let fx = Fixture::start().await;
    fx.mount_library(json!([asset("a1"), asset("a2")])).await;
    Mock::given(method("GET"))
        .and(path("/api/assets/a1/original"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"1".to_vec()))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/assets/a2/original"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"2".to_vec()))
        .mount(&fx.server)
        .await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    let response = handle.run_to_completion(RunKind::Download).await;

    let RunResponse::Finished(item) = response else {
        panic!("run was refused: {response:?}");
    };
    assert_eq!(item.outcome, RunOutcome::Completed);
    assert_eq!(item.downloaded, 2);

    let snapshot = wait_for(&handle, |s| !s.history.is_empty()).await;
    assert!(!snapshot.download.active);
    assert_eq!(snapshot.history[0], item);

    handle.shutdown();
    task.await.unwrap();

    let reloaded = Ledgers::load(&fx.state()).await.unwrap();
    assert_eq!(reloaded.download.len(), 2);
    assert_eq!(reloaded.history.latest(), Some(&item));
}

#[tokio::test]
async fn second_start_while_active_is_refused() {
    let fx = Fixture::start().await;
    fx.mount_library(json!([asset("slow")])).await;
    Mock::given(method("GET"))
        .and(path("/api/assets/slow/original"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&fx.server)
        .await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    handle.start_download();
    let second = handle.run_to_completion(RunKind::Download).await;
    assert_eq!(
        second,
        RunResponse::Refused("download already running".into())
    );

    handle.send(Command::Cancel(RunKind::Download));
    let snapshot = wait_for(&handle, |s| !s.history.is_empty()).await;
    assert_eq!(snapshot.history[0].outcome, RunOutcome::Cancelled);
    assert!(!fx.dir.path().join("library/slow-slow.jpg").exists());

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn paused_engine_refuses_runs_unless_overridden() {
    let fx = Fixture::start().await;
    fx.mount_library(json!([])).await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    handle.send(Command::SetPaused(true));
    assert_eq!(
        handle.run_to_completion(RunKind::Download).await,
        RunResponse::Refused("sync is paused".into())
    );

    handle.send(Command::SetManualOverride(true));
    let response = handle.run_to_completion(RunKind::Download).await;
    assert!(matches!(response, RunResponse::Finished(_)));

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn failed_run_is_exported_from_error_log() {
    let fx = Fixture::start().await;
    Mock::given(method("POST"))
        .and(path("/api/search/metadata"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
        .mount(&fx.server)
        .await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    let RunResponse::Finished(item) = handle.run_to_completion(RunKind::Download).await else {
        panic!("run was refused");
    };
    assert_eq!(item.outcome, RunOutcome::Failed);
    assert_eq!(item.errors, 1);

    let exported = handle.export_errors().await.unwrap();
    assert!(exported.contains("\tdownload\t"));
    assert!(exported.contains("Invalid API key"));

    let snapshot = wait_for(&handle, |s| s.error_count == 1).await;
    assert_eq!(
        snapshot.last_notice.as_deref(),
        Some("The server rejected the API key")
    );

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn folder_change_triggers_debounced_upload() {
    let fx = Fixture::start().await;
    Mock::given(method("POST"))
        .and(path("/api/assets"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "srv-1", "status": "created" })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    fs::write(fx.dir.path().join("watch/IMG_1.jpg"), b"abcd").unwrap();
    handle.send(Command::FolderChanged);
    handle.send(Command::FolderChanged);

    let snapshot = wait_for(&handle, |s| !s.history.is_empty()).await;
    assert_eq!(snapshot.history[0].kind, RunKind::Upload);
    assert_eq!(snapshot.history[0].uploaded, 1);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn credential_update_schedules_probe() {
    let fx = Fixture::start().await;
    for (verb, route, status) in [
        ("GET", "/api/server/about", 200),
        ("POST", "/api/search/metadata", 200),
        ("GET", "/api/albums", 200),
        ("GET", "/api/duplicates", 200),
        ("POST", "/api/assets", 400),
    ] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({})))
            .mount(&fx.server)
            .await;
    }

    let ledgers = Ledgers::load(&fx.state()).await.unwrap();
    let (handle, task) = Coordinator::spawn(fx.settings(), None, ledgers);
    assert_eq!(
        handle.run_to_completion(RunKind::Upload).await,
        RunResponse::Refused("server connection is not configured".into())
    );

    handle.send(Command::UpdateCredentials {
        server_url: fx.server.uri(),
        api_key: "new-key".into(),
    });
    let snapshot = wait_for(&handle, |s| s.connection.is_some()).await;
    assert_eq!(
        snapshot.connection.map(|report| report.status),
        Some(ConnectionStatus::Ok)
    );

    handle.send(Command::UpdateCredentials {
        server_url: "   ".into(),
        api_key: "new-key".into(),
    });
    let snapshot = wait_for(&handle, |s| s.connection.is_none()).await;
    assert!(
        snapshot
            .last_notice
            .as_deref()
            .is_some_and(|notice| notice.starts_with("Invalid server settings"))
    );

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn reset_clears_ledgers_while_idle() {
    let fx = Fixture::start().await;
    let state = fx.state();
    let mut ledgers = Ledgers::load(&state).await.unwrap();
    ledgers.download.insert("a1");
    ledgers.download.save().await.unwrap();
    ledgers.duplicates.insert("key", true);
    ledgers.duplicates.save().await.unwrap();

    let (handle, task) = Coordinator::spawn(fx.settings(), Some(fx.client()), ledgers);
    handle.send(Command::Reset);
    wait_for(&handle, |s| s.last_notice.as_deref() == Some("Sync state reset")).await;
    handle.shutdown();
    task.await.unwrap();

    let reloaded = Ledgers::load(&state).await.unwrap();
    assert!(reloaded.download.is_empty());
    assert!(reloaded.duplicates.is_empty());
    assert!(reloaded.history.is_empty());
}

#[tokio::test]
async fn duplicate_scan_reports_collisions() {
    let fx = Fixture::start().await;
    let watch = fx.dir.path().join("watch");
    fs::create_dir_all(watch.join("copy")).unwrap();
    fs::write(watch.join("IMG_1.jpg"), b"abcd").unwrap();
    fs::write(watch.join("copy/IMG_1.jpg"), b"abcd").unwrap();

    let (handle, task) = fx.spawn(fx.settings()).await;
    handle.send(Command::ScanDuplicates);
    let snapshot = wait_for(&handle, |s| s.duplicate_scan.is_some()).await;
    assert_eq!(snapshot.duplicate_scan.map(|r| r.duplicates), Some(1));

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn failed_run_history_keeps_partial_counts() {
    let fx = Fixture::start().await;
    fx.mount_library(json!([asset("a1"), asset("a2"), asset("a3")])).await;
    for id in ["a1", "a2"] {
        Mock::given(method("GET"))
            .and(path(format!("/api/assets/{id}/original")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(id.as_bytes().to_vec()))
            .mount(&fx.server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/assets/a3/original"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fx.server)
        .await;

    let (handle, task) = fx.spawn(fx.settings()).await;
    let RunResponse::Finished(item) = handle.run_to_completion(RunKind::Download).await else {
        panic!("run was refused");
    };
    assert_eq!(item.outcome, RunOutcome::Failed);
    assert_eq!(item.downloaded, 2);
    assert_eq!(item.errors, 1);

    handle.shutdown();
    task.await.unwrap();
    let reloaded = Ledgers::load(&fx.state()).await.unwrap();
    assert_eq!(reloaded.download.len(), 2);
    assert_eq!(reloaded.history.latest().map(|item| item.downloaded), Some(2));
}
