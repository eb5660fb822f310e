//! Storage daemon: the single owning task of a [`Storage`].
//!
//! The [`StorageDaemon`] receives commands from [`StorageHandle`]s and
//! completions from transports and diff appliers, and applies both to the
//! storage it owns. After every message it runs the dispatch step so freed
//! transfer slots are filled.
//!
//! ```text
//! StorageHandle ──► StorageCommand ──┐
//!                                    ├──► StorageDaemon ──► Storage
//! Transport / DiffApplier ──► Completion ─┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (daemon, handle) = StorageDaemon::new(storage);
//! let shutdown = CancellationToken::new();
//! tokio::spawn(daemon.run(shutdown.clone()));
//!
//! handle.download_node("Luna").await?;
//! let attrs = handle.get_node_attrs("Luna").await?;
//! ```

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handle::StorageHandle;
use super::{Storage, StorageResult};
use crate::country::CountryId;
use crate::diff::DiffInfo;
use crate::queue::CompletionReceiver;

/// Default capacity of the command channel.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Closure run against the storage on the daemon task.
pub type StorageJob = Box<dyn FnOnce(&mut Storage) + Send>;

/// Node operations a handle can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOperation {
    Download,
    Retry,
    Update,
    Cancel,
    Delete,
}

/// A request sent to the daemon.
pub enum StorageCommand {
    Node {
        operation: NodeOperation,
        country_id: CountryId,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    SetCurrentRegion {
        country_id: CountryId,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    DiffStatusReceived {
        diffs: HashMap<CountryId, DiffInfo>,
        reply: oneshot::Sender<()>,
    },
    RestoreQueue {
        reply: oneshot::Sender<StorageResult<usize>>,
    },
    /// Arbitrary work, used for queries.
    Run(StorageJob),
}

impl std::fmt::Debug for StorageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageCommand::Node {
                operation,
                country_id,
                ..
            } => f
                .debug_struct("Node")
                .field("operation", operation)
                .field("country_id", country_id)
                .finish(),
            StorageCommand::SetCurrentRegion { country_id, .. } => f
                .debug_struct("SetCurrentRegion")
                .field("country_id", country_id)
                .finish(),
            StorageCommand::DiffStatusReceived { diffs, .. } => f
                .debug_struct("DiffStatusReceived")
                .field("diffs", &diffs.len())
                .finish(),
            StorageCommand::RestoreQueue { .. } => f.write_str("RestoreQueue"),
            StorageCommand::Run(_) => f.write_str("Run"),
        }
    }
}

pub struct StorageDaemon {
    storage: Storage,
    command_rx: mpsc::Receiver<StorageCommand>,
    completion_rx: CompletionReceiver,
}

impl StorageDaemon {
    /// Creates a daemon owning `storage` and a handle to reach it.
    pub fn new(storage: Storage) -> (Self, StorageHandle) {
        Self::with_capacity(storage, DEFAULT_COMMAND_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(mut storage: Storage, capacity: usize) -> (Self, StorageHandle) {
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let completion_rx = storage.take_completion_receiver();
        let handle = StorageHandle::new(command_tx, storage.notifier().clone());

        let daemon = Self {
            storage,
            command_rx,
            completion_rx,
        };
        (daemon, handle)
    }

    /// Runs until shutdown is signalled or every handle is dropped.
    ///
    /// Running transfers are asked to stop on exit. The queue is left as is,
    /// so a persisted queue is restored on the next start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Storage daemon starting");

        let Self {
            mut storage,
            mut command_rx,
            mut completion_rx,
        } = self;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Storage daemon shutting down");
                    break;
                }

                Some(completion) = completion_rx.recv() => {
                    storage.handle_completion(completion);
                }

                command = command_rx.recv() => match command {
                    Some(command) => Self::handle_command(&mut storage, command),
                    None => {
                        info!("All storage handles dropped");
                        break;
                    }
                },
            }

            storage.dispatch_queue();
        }

        storage.stop_transfers();
        info!("Storage daemon stopped");
    }

    fn handle_command(storage: &mut Storage, command: StorageCommand) {
        debug!(?command, "Storage command");
        match command {
            StorageCommand::Node {
                operation,
                country_id,
                reply,
            } => {
                let result = match operation {
                    NodeOperation::Download => storage.download_node(&country_id),
                    NodeOperation::Retry => storage.retry_download_node(&country_id),
                    NodeOperation::Update => storage.update_node(&country_id),
                    NodeOperation::Cancel => storage.cancel_download_node(&country_id),
                    NodeOperation::Delete => storage.delete_node(&country_id),
                };
                let _ = reply.send(result);
            }
            StorageCommand::SetCurrentRegion { country_id, reply } => {
                let _ = reply.send(storage.set_current_region(&country_id));
            }
            StorageCommand::DiffStatusReceived { diffs, reply } => {
                storage.on_diff_status_received(diffs);
                let _ = reply.send(());
            }
            StorageCommand::RestoreQueue { reply } => {
                let _ = reply.send(storage.restore_queue());
            }
            StorageCommand::Run(job) => job(storage),
        }
    }
}
