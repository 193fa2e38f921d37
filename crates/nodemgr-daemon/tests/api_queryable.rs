//! Integration tests for the JSON API and its Zenoh transport
//!
//! Tests marked with `#[ignore]` require `zenohd` to be running:
//! ```bash
//! zenohd --no-multicast-scouting --listen tcp/127.0.0.1:17447 &
//! cargo test --test api_queryable -- --ignored
//! ```

mod common;

use common::{display, include_sample, setup_test_session, Workspace, ZenohdHandle, TEST_ENDPOINT};
use nodemgr_daemon::api::routes;
use nodemgr_daemon::{
    run_zenoh_api_server, DaemonClient, ErrorKind, ErrorResponse, FileKind, IncludeQuery,
    LoadOutcome, LoadRequest,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_list_root_over_api() {
    let ws = Workspace::new();
    include_sample(&ws);
    let api = ws.api();

    let value = api
        .dispatch(routes::FILES_LIST, Some(br#"{"path":""}"#.as_slice()))
        .await
        .unwrap();
    let entries = value["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["path"], display(ws.root()));
    assert_eq!(entries[0]["kind"], "directory");
}

#[tokio::test]
async fn test_list_missing_path_reply() {
    let ws = Workspace::new();
    let api = ws.api();

    let payload = json!({ "path": display(&ws.root().join("missing")) }).to_string();
    let reply = api.handle(routes::FILES_LIST, Some(payload.as_bytes())).await;
    let error: ErrorResponse = serde_json::from_str(&reply).unwrap();

    assert_eq!(error.kind, ErrorKind::NotFound);
    assert_eq!(error.code, 404);
}

#[tokio::test]
async fn test_includes_over_api() {
    let ws = Workspace::new();
    let root = include_sample(&ws);
    let api = ws.api();

    let payload = json!({
        "path": display(&root),
        "recursive": true,
        "unique": false,
    })
    .to_string();
    let value = api
        .dispatch(routes::LAUNCH_INCLUDES, Some(payload.as_bytes()))
        .await
        .unwrap();

    let includes = value["includes"].as_array().unwrap();
    assert_eq!(includes.len(), 6);
    assert_eq!(includes[0]["line_number"], 6);
    assert_eq!(includes[0]["exists"], true);
    assert_eq!(includes[0]["nested"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_load_status_tags() {
    let ws = Workspace::new();
    ws.package("demo");
    ws.write("demo/a/x.launch", "<launch><arg name=\"n\" default=\"1\"/></launch>");
    ws.write("demo/b/x.launch", "<launch><arg name=\"n\" default=\"1\"/></launch>");
    let api = ws.api();

    let value = api
        .dispatch(
            routes::LAUNCH_LOAD,
            Some(br#"{"package":"demo","name":"x.launch"}"#.as_slice()),
        )
        .await
        .unwrap();
    assert_eq!(value["status"], "file_selection_required");
    let first = value["choices"][0].as_str().unwrap().to_string();

    let payload = json!({ "path": first, "request_arguments": true }).to_string();
    let value = api
        .dispatch(routes::LAUNCH_LOAD, Some(payload.as_bytes()))
        .await
        .unwrap();
    assert_eq!(value["status"], "argument_selection_required");
    assert_eq!(value["choices"], json!({ "n": "1" }));

    let payload = json!({ "path": first, "arguments": { "n": "2" } }).to_string();
    let value = api
        .dispatch(routes::LAUNCH_LOAD, Some(payload.as_bytes()))
        .await
        .unwrap();
    assert_eq!(value["status"], "loaded");
    assert_eq!(value["argv"], json!(["n:=2"]));

    let reply = api.handle(routes::LAUNCH_LOAD, Some(payload.as_bytes())).await;
    let error: ErrorResponse = serde_json::from_str(&reply).unwrap();
    assert_eq!(error.kind, ErrorKind::AlreadyOpen);
    assert_eq!(error.code, 409);
}

#[tokio::test]
async fn test_reload_never_loaded_reply() {
    let ws = Workspace::new();
    let path = ws.write("x.launch", "<launch/>");
    let api = ws.api();

    let payload = json!({ "path": display(&path) }).to_string();
    let reply = api.handle(routes::LAUNCH_RELOAD, Some(payload.as_bytes())).await;
    let error: ErrorResponse = serde_json::from_str(&reply).unwrap();
    assert_eq!(error.kind, ErrorKind::ResourceNotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires zenohd at tcp/127.0.0.1:17447"]
async fn test_client_round_trip_through_router() {
    let _router = ZenohdHandle::start().expect("Failed to start zenohd");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let ws = Workspace::new();
    let root = include_sample(&ws);

    let server_session = setup_test_session()
        .await
        .expect("Failed to create server session");
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let server = tokio::spawn(run_zenoh_api_server(
        server_session,
        ws.api(),
        "test-machine".to_string(),
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let client = DaemonClient::connect(TEST_ENDPOINT, "test-machine")
        .await
        .expect("Failed to connect client");

    assert_eq!(client.health().await.unwrap().status, "ok");

    let roots = client.list_path("").await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].kind, FileKind::Directory);

    let content = client.get_file_content(&display(&root)).await.unwrap();
    assert_eq!(content.size as usize, content.bytes.len());

    let includes = client
        .resolve_includes(
            &display(&root),
            &IncludeQuery {
                recursive: true,
                unique: true,
                include_pattern: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(includes.len(), 4);

    let outcome = client
        .load(&LoadRequest {
            path: display(&root),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(matches!(outcome, LoadOutcome::Loaded { .. }));

    let again = client
        .load(&LoadRequest {
            path: display(&root),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(again.kind(), Some(ErrorKind::AlreadyOpen));

    assert_eq!(client.loaded().await.unwrap().len(), 1);
    assert!(client.unload(&display(&root)).await.unwrap());

    shutdown_tx.send(()).ok();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}
