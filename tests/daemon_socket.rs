//! Daemon reachable over a real UNIX socket, driven through DaemonClient.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use wolfies_sms_relay::client::{ClientError, DaemonClient};
use wolfies_sms_relay::clock::SystemClock;
use wolfies_sms_relay::config::ConfigStore;
use wolfies_sms_relay::daemon::{DaemonServer, DaemonService};
use wolfies_sms_relay::db::{KvStore, SqliteStore};
use wolfies_sms_relay::forwarding::{ForwardingService, HistoryLog, StatsTracker};
use wolfies_sms_relay::permission::BridgeGate;
use wolfies_sms_relay::testing::ScriptedRelay;

async fn call(socket: &Path, method: &str, params: Value) -> Result<Value, ClientError> {
    let socket = socket.to_path_buf();
    let method = method.to_string();
    let params: HashMap<String, Value> = serde_json::from_value(params).unwrap();
    tokio::task::spawn_blocking(move || {
        DaemonClient::new(socket, Duration::from_secs(5)).request(&method, params)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("daemon.sock");

    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(dir.path().join("relay.db")).unwrap());
    let gate = Arc::new(BridgeGate::new(Duration::from_secs(5)));
    let forwarding = Arc::new(ForwardingService::new(
        Arc::new(ConfigStore::load(store.clone())),
        Arc::new(StatsTracker::load(store.clone(), Arc::new(SystemClock))),
        Arc::new(HistoryLog::new(store)),
        Arc::new(ScriptedRelay::always_ok()),
        gate.clone(),
    ));
    let server = DaemonServer::new(DaemonService::from_parts(forwarding, gate), &socket);

    let shutdown = CancellationToken::new();
    let serving = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve(shutdown).await })
    };

    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let health = call(&socket, "health", json!({})).await.unwrap();
    assert_eq!(health["protocol_v"], 1);

    let err = call(&socket, "activate", json!({})).await.unwrap_err();
    assert_eq!(err.code(), "PERMISSION_DENIED");

    call(&socket, "permission", json!({ "granted": true })).await.unwrap();
    call(
        &socket,
        "update_config",
        json!({ "relay_token": "1:abc", "relay_destination_id": "7", "filter_keywords": ["otp"] }),
    )
    .await
    .unwrap();
    call(&socket, "activate", json!({})).await.unwrap();

    call(&socket, "message", json!({ "sender": "+15550001", "body": "your OTP is 1" }))
        .await
        .unwrap();
    call(&socket, "message", json!({ "sender": "+15550001", "body": "lunch?" }))
        .await
        .unwrap();

    let mut total = Value::Null;
    for _ in 0..100 {
        let stats = call(&socket, "stats", json!({})).await.unwrap();
        total = stats["total_forwarded"].clone();
        if total == json!(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(total, json!(1));

    let history = call(&socket, "history", json!({})).await.unwrap();
    assert_eq!(history["count"], 1);
    assert_eq!(history["records"][0]["body"], "lunch?");

    shutdown.cancel();
    serving.await.unwrap().unwrap();
    assert!(!socket.exists());
}
