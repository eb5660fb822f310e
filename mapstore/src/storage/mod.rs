//! The storage orchestrator.
//!
//! [`Storage`] owns the catalog, the local file registry, the download queue
//! and the diff bookkeeping, and is the only place any of them is mutated.
//! It is a plain single-owner struct: the [`StorageDaemon`] wraps it in a
//! task so that every mutation happens on one owning context, and
//! [`StorageHandle`] talks to that task from anywhere.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Storage                               │
//! │                                                                 │
//! │  download_node ──► DownloadQueue ──► dispatch_queue ──► Transport
//! │  update_node   ──►   (+ DiffManager)                      │     │
//! │  cancel / delete ──► LocalFileRegistry                    │     │
//! │                                                           ▼     │
//! │  Completion channel ◄── TransferReporter / DiffReporter ◄─┘     │
//! │        │                                                        │
//! │        └──► handle_completion ──► registry + Notifier ──► sinks │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mapstore::config::StorageConfig;
//! use mapstore::country::load_catalog;
//! use mapstore::storage::{StorageBuilder, StorageDaemon};
//! use tokio_util::sync::CancellationToken;
//!
//! let tree = load_catalog(Path::new("countries.json"))?;
//! let storage = StorageBuilder::new(StorageConfig::load()?, tree).build()?;
//! let (daemon, handle) = StorageDaemon::new(storage);
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(daemon.run(shutdown.clone()));
//!
//! handle.download_node("Luna").await?;
//! ```

mod attrs;
mod completion;
mod daemon;
mod error;
mod handle;
mod operations;
mod persist;
mod policy;
mod resolver;

pub use attrs::{aggregate_status, NodeAttrs, NodeStatuses};
pub use daemon::{
    NodeOperation, StorageCommand, StorageDaemon, StorageJob, DEFAULT_COMMAND_CHANNEL_CAPACITY,
};
pub use error::{StorageError, StorageResult};
pub use handle::StorageHandle;
pub use policy::{AllowAllDownloads, DownloadingPolicy};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::country::{CountryId, CountryNames, CountryNode, CountryTree, NodeErrorCode, Progress};
use crate::diff::{DiffApplier, DiffManager, FreeSpaceSource, StatvfsFreeSpace};
use crate::local::LocalFileRegistry;
use crate::notify::{
    CallbackSink, EventSink, Notifier, StatusChange, StorageEvent, SubscriptionId,
};
use crate::queue::{CompletionReceiver, CompletionSender, DownloadQueue};
use crate::transport::{HttpTransport, Transport};

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`Storage`] from its configuration and collaborators.
///
/// Everything except the configuration and the catalog has a default:
/// - transport: [`HttpTransport`] with the configured timeout
/// - free space: [`StatvfsFreeSpace`] on the data directory
/// - downloading policy: [`AllowAllDownloads`]
/// - no diff applier, so diffs are never selected
pub struct StorageBuilder {
    config: StorageConfig,
    tree: CountryTree,
    names: CountryNames,
    transport: Option<Arc<dyn Transport>>,
    applier: Option<Arc<dyn DiffApplier>>,
    free_space: Option<Arc<dyn FreeSpaceSource>>,
    policy: Option<Arc<dyn DownloadingPolicy>>,
}

impl StorageBuilder {
    pub fn new(config: StorageConfig, tree: CountryTree) -> Self {
        Self {
            config,
            tree,
            names: CountryNames::default(),
            transport: None,
            applier: None,
            free_space: None,
            policy: None,
        }
    }

    pub fn names(mut self, names: CountryNames) -> Self {
        self.names = names;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn diff_applier(mut self, applier: Arc<dyn DiffApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn free_space(mut self, source: Arc<dyn FreeSpaceSource>) -> Self {
        self.free_space = Some(source);
        self
    }

    pub fn downloading_policy(mut self, policy: Arc<dyn DownloadingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Scans the data directory and returns a ready storage.
    ///
    /// The persisted queue is not restored here; call
    /// [`Storage::restore_queue`] once observers are subscribed.
    pub fn build(self) -> StorageResult<Storage> {
        let mut registry = LocalFileRegistry::new(&self.config.data_dir);
        let report = registry.scan(&self.tree)?;

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(
                HttpTransport::with_timeout(self.config.timeout)
                    .with_checksum_verification(self.config.verify_checksums),
            )
        });
        let free_space = self
            .free_space
            .unwrap_or_else(|| Arc::new(StatvfsFreeSpace::new(&self.config.data_dir)));
        let policy = self.policy.unwrap_or_else(|| Arc::new(AllowAllDownloads));

        let mut diffs = DiffManager::new(free_space);
        diffs.set_applier_available(self.applier.is_some());

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        info!(
            data_dir = %self.config.data_dir.display(),
            version = self.tree.version(),
            nodes = self.tree.len(),
            concurrency = %self.config.concurrency,
            "Storage initialized"
        );

        Ok(Storage {
            config: self.config,
            tree: self.tree,
            names: self.names,
            registry,
            queue: DownloadQueue::new(),
            diffs,
            failed: HashMap::new(),
            just_downloaded: HashSet::new(),
            not_applied_diffs: report.not_applied_diffs,
            notifier: Notifier::new(),
            transport,
            applier: self.applier,
            policy,
            completion_tx,
            completion_rx: Some(completion_rx),
            current_region: None,
        })
    }
}

// =============================================================================
// Storage
// =============================================================================

pub struct Storage {
    config: StorageConfig,
    tree: CountryTree,
    names: CountryNames,
    registry: LocalFileRegistry,
    queue: DownloadQueue,
    diffs: DiffManager,
    /// Leaves whose last transfer failed, with the reason.
    failed: HashMap<CountryId, NodeErrorCode>,
    /// Leaves finished during the current queue run. Cleared when the
    /// queue drains.
    just_downloaded: HashSet<CountryId>,
    /// Diffs found on disk at startup with no map built from them yet.
    not_applied_diffs: Vec<CountryId>,
    notifier: Notifier,
    transport: Arc<dyn Transport>,
    applier: Option<Arc<dyn DiffApplier>>,
    policy: Arc<dyn DownloadingPolicy>,
    completion_tx: CompletionSender,
    completion_rx: Option<CompletionReceiver>,
    current_region: Option<CountryId>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("data_dir", &self.config.data_dir)
            .field("version", &self.tree.version())
            .field("queued", &self.queue.len())
            .field("failed", &self.failed.len())
            .field("diffs", &self.diffs)
            .finish_non_exhaustive()
    }
}

impl Storage {
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn tree(&self) -> &CountryTree {
        &self.tree
    }

    pub fn registry(&self) -> &LocalFileRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn diffs(&self) -> &DiffManager {
        &self.diffs
    }

    /// Shared notifier. Clones subscribe into the same registry.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.notifier.subscribe(sink)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StorageEvent>) {
        self.notifier.subscribe_channel()
    }

    pub fn subscribe_callbacks<S, P>(&self, on_status: S, on_progress: P) -> SubscriptionId
    where
        S: Fn(&[StatusChange]) + Send + Sync + 'static,
        P: Fn(&str, Progress) + Send + Sync + 'static,
    {
        self.notifier
            .subscribe(Arc::new(CallbackSink::new(on_status, on_progress)))
    }

    /// Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // -------------------------------------------------------------------------
    // Completions
    // -------------------------------------------------------------------------

    /// Hands the completion receiver to a daemon.
    ///
    /// If it was already handed out, a new channel replaces the old one.
    /// After this, [`process_pending_completions`](Self::process_pending_completions)
    /// does nothing.
    pub(crate) fn take_completion_receiver(&mut self) -> CompletionReceiver {
        match self.completion_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.completion_tx = tx;
                rx
            }
        }
    }

    /// Asks every running transfer and diff application to stop. The queue
    /// itself is kept, so a saved queue still restores it.
    pub fn stop_transfers(&self) {
        for request in self.queue.iter() {
            request.cancel();
        }
    }

    /// Handles every completion already reported, then starts whatever the
    /// queue allows. Returns the number handled.
    ///
    /// Used when the storage is driven without a daemon.
    pub fn process_pending_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Some(completion) = self.completion_rx.as_mut().and_then(|rx| rx.try_recv().ok())
        {
            self.handle_completion(completion);
            handled += 1;
        }
        if handled > 0 {
            self.dispatch_queue();
        }
        handled
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    fn node(&self, id: &str) -> StorageResult<&CountryNode> {
        self.tree.get(id).ok_or_else(|| {
            warn!(country_id = id, "Unknown country id");
            StorageError::UnknownCountry(id.to_string())
        })
    }

    fn ensure_known(&self, id: &str) -> StorageResult<()> {
        self.node(id).map(|_| ())
    }
}
