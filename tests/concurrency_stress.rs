#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use brokergate::{app, build_state};
use common::{static_config, write_sample_catalog, RecordingUpdater};

type RunningApp = (tokio::task::JoinHandle<()>, u16, Arc<RecordingUpdater>);

async fn start(dir: &tempfile::TempDir) -> RunningApp {
    let updater = RecordingUpdater::shared();
    let state = build_state(static_config(&write_sample_catalog(dir)), updater.clone()).unwrap();
    let app = app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::task::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (handle, port, updater)
}

async fn fire(port: u16, n: u32) {
    let client = reqwest::Client::new();
    let url = format!(
        "http://127.0.0.1:{}/v2/service_instances/inst-{}?accepts_incomplete=true",
        port, n
    );
    let body = r#"{"service_id":"svc-1","plan_id":"plan-b","previous_values":{"plan_id":"plan-a"}}"#;
    let r = client
        .patch(&url)
        .header("X-Broker-API-Version", "2.17")
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status().as_u16(), 202);
}

#[tokio::test]
async fn concurrent_updates_each_reach_backend_once() {
    let dir = tempfile::tempdir().unwrap();
    let total = 200u32;
    let concurrency = 32usize;

    let (handle, port, updater) = start(&dir).await;
    let mut tasks = Vec::new();
    for n in 0..total {
        tasks.push(tokio::spawn(fire(port, n)));
        if tasks.len() >= concurrency {
            for task in tasks.drain(..) {
                task.await.unwrap();
            }
        }
    }
    for task in tasks {
        task.await.unwrap();
    }
    handle.abort();

    assert_eq!(updater.count() as u32, total);
    let mut ids: Vec<String> = updater
        .received
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.service_instance_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len() as u32, total);
}
