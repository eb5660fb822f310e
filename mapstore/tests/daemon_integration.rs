//! Integration tests for the storage daemon and its handle.
//!
//! The daemon runs on the test runtime; transfers are finished from the
//! test through the manual transport, and their completions travel back
//! through the daemon's completion channel.
//!
//! Run with: `cargo test --test daemon_integration`

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{drain, progress_of, Fixture};
use mapstore::country::NodeStatus;
use mapstore::storage::{StorageDaemon, StorageError, StorageHandle};

// ============================================================================
// Helper Functions
// ============================================================================

/// Polls the daemon until `id` reaches `status`, or panics after a second.
async fn wait_for_status(handle: &StorageHandle, id: &str, status: NodeStatus) {
    for _ in 0..100 {
        if handle.get_node_attrs(id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {:?}", id, status);
}

/// Polls until the transport has started `count` transfers.
async fn wait_for_transfers(fixture: &Fixture, count: usize) {
    for _ in 0..100 {
        if fixture.transport.started_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("only {} transfers started", fixture.transport.started_count());
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Download through the handle; the completion is picked up by the daemon
/// without any further command.
#[tokio::test]
async fn test_download_through_daemon() {
    let fixture = Fixture::new();
    let (daemon, handle) = StorageDaemon::new(fixture.storage());
    let (_, mut events) = handle.subscribe_channel();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(daemon.run(shutdown.clone()));

    handle.download_node("Luna").await.unwrap();
    assert!(handle.is_download_in_progress().await.unwrap());
    wait_for_transfers(&fixture, 1).await;

    fixture.transport.last_for("Luna").unwrap().complete();
    wait_for_status(&handle, "Luna", NodeStatus::OnDisk).await;
    assert!(!handle.is_download_in_progress().await.unwrap());

    let progress = progress_of(&drain(&mut events), "Luna");
    assert_eq!(progress.last(), Some(&(1000, 1000)));

    shutdown.cancel();
    task.await.unwrap();
}

/// Group queries go through the same handle.
#[tokio::test]
async fn test_queries_through_daemon() {
    let fixture = Fixture::new();
    let (daemon, handle) = StorageDaemon::new(fixture.storage());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(daemon.run(shutdown.clone()));

    assert_eq!(handle.get_root_id().await.unwrap(), "Countries");
    assert_eq!(
        handle.get_group_node_path_to_root("Japan").await.unwrap(),
        vec!["Asia".to_string(), "Countries".to_string()]
    );

    handle.download_node("Europe").await.unwrap();
    let statuses = handle.get_node_statuses("Europe").await.unwrap();
    assert_eq!(statuses.status, NodeStatus::Downloading);
    assert!(statuses.is_group);

    let progress = handle
        .get_overall_progress(vec!["Europe".to_string(), "Luna".to_string()])
        .await
        .unwrap();
    assert_eq!(progress.bytes_total, 1500);

    assert!(matches!(
        handle.download_node("Atlantis").await,
        Err(StorageError::UnknownCountry(_))
    ));

    shutdown.cancel();
    task.await.unwrap();
}

/// Shutdown cancels running transfers, and the handle reports the daemon
/// as stopped afterwards.
#[tokio::test]
async fn test_shutdown_stops_transfers() {
    let fixture = Fixture::new();
    let (daemon, handle) = StorageDaemon::new(fixture.storage());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(daemon.run(shutdown.clone()));

    handle.download_node("Mars").await.unwrap();
    wait_for_transfers(&fixture, 1).await;

    shutdown.cancel();
    task.await.unwrap();

    assert!(fixture.transport.last_for("Mars").unwrap().cancel.is_cancelled());
    assert!(matches!(
        handle.download_node("Luna").await,
        Err(StorageError::DaemonStopped)
    ));
}

/// Dropping every handle ends the daemon.
#[tokio::test]
async fn test_daemon_exits_when_handles_dropped() {
    let fixture = Fixture::new();
    let (daemon, handle) = StorageDaemon::new(fixture.storage());
    let task = tokio::spawn(daemon.run(CancellationToken::new()));

    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("daemon did not exit")
        .unwrap();
}
