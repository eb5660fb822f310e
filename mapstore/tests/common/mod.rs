//! Shared fixtures for the storage integration tests.
//!
//! The transport and diff applier here never run anything on their own.
//! Tests pick up the started work and decide when and how it finishes.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mapstore::config::StorageConfig;
use mapstore::country::{parse_catalog, CountryTree, DataVersion};
use mapstore::diff::{DiffApplier, DiffApplyParams, DiffApplyResult, DiffReporter, FixedFreeSpace};
use mapstore::notify::{StatusChange, StorageEvent};
use mapstore::storage::{Storage, StorageBuilder};
use mapstore::transport::{
    TransferFailure, TransferHandle, TransferJob, TransferOutcome, TransferReporter, Transport,
};

// ============================================================================
// Catalog
// ============================================================================

pub const OLD_VERSION: DataVersion = 250101;
pub const CURRENT_VERSION: DataVersion = 250201;

/// Five-leaf Europe, two single leaves and a leaf shared by two groups.
pub const CATALOG: &str = r#"{
    "id": "Countries",
    "v": 250201,
    "g": [
        { "id": "Luna", "s": 1000, "name": "Moon" },
        { "id": "Mars", "s": 2000 },
        { "id": "Europe", "g": [
            { "id": "Cyprus", "s": 100 },
            { "id": "Malta", "s": 200 },
            { "id": "Iceland", "s": 300 },
            { "id": "Ireland", "s": 400 },
            { "id": "Estonia", "s": 500 }
        ] },
        { "id": "Asia", "g": [
            { "id": "Japan", "g": [
                { "id": "Hokkaido", "s": 600 },
                { "id": "Honshu", "s": 700 }
            ] },
            { "id": "Disputed", "s": 50 }
        ] },
        { "id": "Africa", "g": [
            { "id": "Disputed", "s": 50 }
        ] }
    ]
}"#;

pub const EUROPE_LEAVES: [&str; 5] = ["Cyprus", "Malta", "Iceland", "Ireland", "Estonia"];

pub fn catalog() -> CountryTree {
    parse_catalog(CATALOG).unwrap()
}

// ============================================================================
// Manual transport
// ============================================================================

/// One transfer handed to the [`ManualTransport`].
#[derive(Clone)]
pub struct StartedTransfer {
    pub job: TransferJob,
    pub reporter: TransferReporter,
    pub cancel: CancellationToken,
}

impl StartedTransfer {
    /// Writes the finished file the way a real transport would, then
    /// reports half and full progress and success.
    pub fn complete(&self) {
        write_file(&self.job.destination, self.job.expected_size as usize);
        let total = self.job.expected_size;
        self.reporter.progress(total / 2, total);
        self.reporter.progress(total, total);
        self.reporter.clone().finish(TransferOutcome::Completed);
    }

    pub fn fail(&self, failure: TransferFailure) {
        self.reporter.clone().finish(TransferOutcome::Failed(failure));
    }

    /// Leaves a partial file behind, as an interrupted transfer would.
    pub fn write_partial(&self, bytes: usize) {
        let mut partial = self.job.destination.as_os_str().to_os_string();
        partial.push(".downloading");
        write_file(Path::new(&partial), bytes);
        self.reporter
            .progress(bytes as u64, self.job.expected_size);
    }
}

/// Records every started transfer and never finishes one by itself.
#[derive(Default)]
pub struct ManualTransport {
    started: Mutex<Vec<StartedTransfer>>,
}

impl ManualTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> Vec<StartedTransfer> {
        self.started.lock().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().len()
    }

    /// The most recent transfer started for `id`.
    pub fn last_for(&self, id: &str) -> Option<StartedTransfer> {
        self.started
            .lock()
            .iter()
            .rev()
            .find(|t| t.job.country_id == id)
            .cloned()
    }
}

impl Transport for ManualTransport {
    fn start(&self, job: TransferJob, reporter: TransferReporter) -> TransferHandle {
        let cancel = CancellationToken::new();
        self.started.lock().push(StartedTransfer {
            job,
            reporter,
            cancel: cancel.clone(),
        });
        TransferHandle::new(cancel)
    }
}

// ============================================================================
// Manual diff applier
// ============================================================================

pub struct PendingApply {
    pub params: DiffApplyParams,
    pub reporter: DiffReporter,
    pub cancel: CancellationToken,
}

impl PendingApply {
    /// Writes a patched map of `size` bytes and reports success.
    pub fn succeed(self, size: usize) {
        write_file(&self.params.output, size);
        self.reporter.finish(DiffApplyResult::Ok);
    }

    pub fn fail(self, reason: &str) {
        self.reporter
            .finish(DiffApplyResult::Failed(reason.to_string()));
    }
}

#[derive(Default)]
pub struct ManualApplier {
    pending: Mutex<Vec<PendingApply>>,
}

impl ManualApplier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<PendingApply> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl DiffApplier for ManualApplier {
    fn start(&self, params: DiffApplyParams, reporter: DiffReporter, cancel: CancellationToken) {
        self.pending.lock().push(PendingApply {
            params,
            reporter,
            cancel,
        });
    }
}

// ============================================================================
// Storage setup
// ============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub transport: Arc<ManualTransport>,
    pub applier: Arc<ManualApplier>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            transport: ManualTransport::new(),
            applier: ManualApplier::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> StorageConfig {
        StorageConfig::new(self.root()).with_server("https://maps.example")
    }

    pub fn builder(&self) -> StorageBuilder {
        self.builder_with(self.config())
    }

    pub fn builder_with(&self, config: StorageConfig) -> StorageBuilder {
        StorageBuilder::new(config, catalog())
            .transport(self.transport.clone())
            .diff_applier(self.applier.clone())
            .free_space(Arc::new(FixedFreeSpace(u64::MAX / 2)))
    }

    pub fn storage(&self) -> Storage {
        self.builder().build().unwrap()
    }

    /// Places a stable map file on disk before the storage is built.
    pub fn seed_map(&self, version: DataVersion, id: &str, size: usize) {
        write_file(
            &self.root().join(version.to_string()).join(format!("{}.map", id)),
            size,
        );
    }
}

pub fn write_file(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![0u8; size]).unwrap();
}

/// Every event received so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<StorageEvent>) -> Vec<StorageEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Only the status batches, in order.
pub fn status_batches(events: &[StorageEvent]) -> Vec<Vec<StatusChange>> {
    events
        .iter()
        .filter_map(|e| match e {
            StorageEvent::StatusChanged(changes) => Some(changes.clone()),
            _ => None,
        })
        .collect()
}

/// Progress values reported for `id`, in order.
pub fn progress_of(events: &[StorageEvent], id: &str) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            StorageEvent::ProgressChanged {
                country_id,
                progress,
            } if country_id == id => Some((progress.bytes_downloaded, progress.bytes_total)),
            _ => None,
        })
        .collect()
}

/// Every file under `dir`, recursively, relative to it.
pub fn files_under(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(dir) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    out.sort();
    out
}
