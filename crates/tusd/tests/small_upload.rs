use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use tus_hooks::{HookDispatcher, NoopHookHandler};
use tus_locker::InMemoryLocker;
use tus_storage::StoreComposer;
use tusd::config::{Backend, Config};
use tusd::state::AppState;

async fn test_app() -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(tus_fs_store::LocalDirStore::new(dir.path()).await.unwrap());
    let composer = StoreComposer::new(store.clone())
        .with_terminater(store.clone())
        .with_concater(store.clone())
        .with_length_deferrer(store.clone())
        .with_serve_content(store.clone())
        .with_locker(Arc::new(InMemoryLocker::new()));

    let config = Config {
        host: "0.0.0.0".into(),
        port: 0,
        base_path: "/files".into(),
        backend: Backend::Filesystem,
        data_dir: dir.path().to_string_lossy().into_owned(),
        s3_bucket: None,
        gcs_bucket: None,
        azure_container: None,
        max_size: None,
        timeout_secs: 6,
        shutdown_grace_secs: 0,
        progress_hooks_interval_ms: 1000,
        enable_get: true,
        behind_proxy: false,
        cors_enabled: false,
    };

    let state = Arc::new(AppState {
        composer,
        hooks: Arc::new(HookDispatcher::new(Arc::new(NoopHookHandler))),
        config,
    });
    (tusd::build_router(state), dir)
}

#[tokio::test]
async fn small_upload_one_chunk_round_trips() {
    let (app, _dir) = test_app().await;

    let create_req = Request::builder()
        .method("POST")
        .uri("/files")
        .header("Tus-Resumable", "1.0.0")
        .header("Upload-Length", "11")
        .body(Body::empty())
        .unwrap();
    let created = app.clone().oneshot(create_req).await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let location = created
        .headers()
        .get("Location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let id = location.rsplit('/').next().unwrap().to_string();

    let patch_req = Request::builder()
        .method("PATCH")
        .uri(&location)
        .header("Tus-Resumable", "1.0.0")
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from("hello world"))
        .unwrap();
    let patched = app.clone().oneshot(patch_req).await.unwrap();
    assert_eq!(patched.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        patched.headers().get("Upload-Offset").unwrap().to_str().unwrap(),
        "11"
    );

    let head_req = Request::builder()
        .method("HEAD")
        .uri(&location)
        .header("Tus-Resumable", "1.0.0")
        .body(Body::empty())
        .unwrap();
    let head_resp = app.clone().oneshot(head_req).await.unwrap();
    assert_eq!(
        head_resp.headers().get("Upload-Offset").unwrap().to_str().unwrap(),
        "11"
    );
    assert_eq!(
        head_resp.headers().get("Upload-Length").unwrap().to_str().unwrap(),
        "11"
    );

    let get_req = Request::builder()
        .method("GET")
        .uri(&location)
        .body(Body::empty())
        .unwrap();
    let get_resp = app.oneshot(get_req).await.unwrap();
    assert_eq!(get_resp.status(), StatusCode::OK);
    let bytes = get_resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello world");

    let _ = id;
}

#[tokio::test]
async fn offset_mismatch_returns_409() {
    let (app, _dir) = test_app().await;

    let create_req = Request::builder()
        .method("POST")
        .uri("/files")
        .header("Tus-Resumable", "1.0.0")
        .header("Upload-Length", "11")
        .body(Body::empty())
        .unwrap();
    let created = app.clone().oneshot(create_req).await.unwrap();
    let location = created
        .headers()
        .get("Location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let patch_req = Request::builder()
        .method("PATCH")
        .uri(&location)
        .header("Tus-Resumable", "1.0.0")
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", "3")
        .body(Body::from("xyz"))
        .unwrap();
    let resp = app.oneshot(patch_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}
