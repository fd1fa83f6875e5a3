//! End-to-end protocol flow against a live daemon on a temp socket.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use membank_config::AppConfig;
use membank_memory::NodeChanges;
use membank_runtime::{DaemonClient, ServerEvent, UpdateOutcome, run_daemon};

#[tokio::test]
async fn daemon_round_trip() {
    let root = TempDir::new().unwrap();
    let bank = root.path().join("memory-bank");
    fs::create_dir(&bank).unwrap();
    fs::write(
        bank.join("alpha.md"),
        "---\nid: alpha\ntitle: Alpha\nstatus: planned\n---\n\nAlpha body\n",
    )
    .unwrap();

    let socket = root.path().join("membank.sock");
    let mut config = AppConfig::default();
    config.daemon.socket_path = socket.display().to_string();
    config.watch.debounce_ms = 50;

    let daemon = tokio::spawn(run_daemon(config, root.path().to_path_buf()));

    let client = DaemonClient::new(&socket);
    client.connect_with_backoff(20).await.unwrap();
    client.ping().await.unwrap();

    let body = client.fetch_body("alpha").await.unwrap();
    assert_eq!(body.as_deref(), Some("Alpha body\n"));
    // Unknown ids are served with an absent body, not an error.
    assert_eq!(client.fetch_body("ghost").await.unwrap(), None);

    // A subscriber receives the current snapshot first.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = client.clone();
    tokio::spawn(async move {
        let _ = subscriber.subscribe(tx).await;
    });
    let first = rx.recv().await.unwrap();
    let ServerEvent::Init(snapshot) = first else {
        panic!("expected Init, got {first:?}");
    };
    assert!(snapshot.exists);
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.watch_pattern, "memory-bank/**/*.md");

    // Validation failures come back as structured rejections.
    let outcome = client
        .update_node(
            "alpha",
            NodeChanges {
                status: Some("archived".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Rejected(_)));

    // A valid update is saved, and a fresh Init supersedes the old state.
    let outcome = client
        .update_node(
            "alpha",
            NodeChanges {
                status: Some("done".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Saved);
    let rebuilt = loop {
        match rx.recv().await.unwrap() {
            ServerEvent::Init(payload) => break payload,
            _ => {}
        }
    };
    assert_eq!(rebuilt.nodes[0].status, "done");

    // A stale identifier is a no-op, not an error.
    let outcome = client
        .update_node("ghost", NodeChanges::default())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Stale);

    client.graceful_shutdown().await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), daemon).await;
}

/// A rebuild landing while a subscription is being set up must still reach
/// the subscriber: without a later filesystem event, a missed broadcast
/// would leave the client on a stale snapshot forever.
#[tokio::test]
async fn subscription_racing_an_update_converges() {
    let root = TempDir::new().unwrap();
    let bank = root.path().join("memory-bank");
    fs::create_dir(&bank).unwrap();
    fs::write(
        bank.join("alpha.md"),
        "---\nid: alpha\ntitle: Alpha\nstatus: planned\n---\n\n",
    )
    .unwrap();

    let socket = root.path().join("membank.sock");
    let mut config = AppConfig::default();
    config.daemon.socket_path = socket.display().to_string();
    // A long quiet period keeps the watcher from papering over a missed
    // broadcast with a second rebuild.
    config.watch.debounce_ms = 60_000;

    let daemon = tokio::spawn(run_daemon(config, root.path().to_path_buf()));

    let client = DaemonClient::new(&socket);
    client.connect_with_backoff(20).await.unwrap();

    // Subscribe and update concurrently; the update's rebuild may broadcast
    // at any point during subscription setup.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = client.clone();
    tokio::spawn(async move {
        let _ = subscriber.subscribe(tx).await;
    });
    let outcome = client
        .update_node(
            "alpha",
            NodeChanges {
                status: Some("done".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Saved);

    // Either the first snapshot already carries the update or a broadcast
    // Init follows; it must never take a further rebuild to arrive.
    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if let ServerEvent::Init(payload) = event {
                if payload.nodes[0].status == "done" {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(converged, "subscriber never saw the updated snapshot");

    client.graceful_shutdown().await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), daemon).await;
}
