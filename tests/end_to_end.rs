mod common;

use common::{MIB, payload, target};
use resumable_upload::{
    app,
    client::{
        FileSource, HttpBlobTransport, HttpUploadApi, SessionStore, SqliteSessionStore,
        UploadOrchestrator,
    },
    models::upload::UploadKind,
    services::{
        local_store::LocalBlobStore,
        upload_service::{UploadPolicy, UploadService},
    },
    state::AppState,
};
use std::{io::Write, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serve the app on an ephemeral port; returns its base URL and store.
async fn spawn_server() -> (String, LocalBlobStore) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let store = LocalBlobStore::new(base_url.clone());
    let state = AppState::new(UploadService::new(
        Arc::new(store.clone()),
        UploadPolicy::default(),
    ))
    .with_local_store(store.clone());

    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    (base_url, store)
}

#[tokio::test]
async fn file_upload_over_http_with_sqlite_sessions() {
    let (base_url, store) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("sessions.db").display());
    let sessions = Arc::new(SqliteSessionStore::connect(&db_url).await.unwrap());

    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    let data = payload(12 * MIB);
    file.write_all(&data).unwrap();
    let source = FileSource::open(file.path(), None, UploadKind::Video)
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let orchestrator = UploadOrchestrator::new(
        Arc::new(HttpUploadApi::with_client(client.clone(), base_url.clone())),
        Arc::new(HttpBlobTransport::new(client.clone())),
        sessions.clone(),
    );

    let outcome = orchestrator
        .upload_file(&target(), &source, |_| {}, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.url.starts_with(&base_url));
    assert!(sessions.load(&target()).await.unwrap().is_none());

    let downloaded = client
        .get(&outcome.url)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(downloaded, data);
    assert_eq!(store.pending_uploads().await, 0);
}

#[tokio::test]
async fn api_errors_surface_status_and_message() {
    let (base_url, _store) = spawn_server().await;
    let api = HttpUploadApi::new(base_url);

    let err = resumable_upload::client::UploadApi::list_parts(
        &api,
        "uploads/0xabc/export/video/k.mp4",
        "missing",
    )
    .await
    .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("does not exist"));
}
