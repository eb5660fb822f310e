//! Logging setup as a host application would use it.
//!
//! Kept in its own test binary: it installs the global subscriber.
//!
//! Run with: `cargo test --test logging_integration`

mod common;

use std::fs;

use common::{Fixture, CURRENT_VERSION};
use mapstore::logging::{init_logging, DEFAULT_LOG_FILE};

/// Storage events end up in the log file once the guard is dropped.
#[test]
fn test_storage_events_reach_log_file() {
    let fixture = Fixture::new();
    let log_dir = fixture.root().join("logs");

    let guard = init_logging(&log_dir, DEFAULT_LOG_FILE).unwrap();
    assert!(log_dir.join(DEFAULT_LOG_FILE).exists());

    fixture.seed_map(CURRENT_VERSION, "Mars", 2000);
    let mut storage = fixture.storage();
    storage.delete_node("Mars").unwrap();
    drop(guard);

    let log = fs::read_to_string(log_dir.join(DEFAULT_LOG_FILE)).unwrap();
    assert!(log.contains("Deleted region"));
    assert!(log.contains("Mars"));
}
