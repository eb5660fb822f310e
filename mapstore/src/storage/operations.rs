//! Mutating node operations and the dispatch step.
//!
//! Every public operation runs inside one batching scope, dispatch step
//! included, so observers get a single status batch per call. A leaf that
//! changes twice in one call appears once, with its final status.

use tracing::{debug, error, info, warn};

use super::{Storage, StorageError, StorageResult};
use crate::country::{NodeErrorCode, NodeStatus};
use crate::local::{self, FileKind};
use crate::notify::StatusChange;
use crate::queue::TransferRequest;
use crate::transport::{TransferJob, TransferReporter};

impl Storage {
    // -------------------------------------------------------------------------
    // Public operations
    // -------------------------------------------------------------------------

    /// Queues every leaf of the subtree that is not on disk at the current
    /// version. Out-of-date leaves use a diff when one is known.
    pub fn download_node(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        if self.node_status(id).0 == NodeStatus::OnDisk {
            debug!(country_id = id, "Already on disk, nothing to download");
            return Ok(());
        }

        self.batched(|storage| {
            for leaf in storage.tree.leaf_ids(id) {
                if storage.leaf_status(&leaf).0 != NodeStatus::OnDisk {
                    storage.enqueue_leaf(&leaf);
                }
            }
            Ok(())
        })
    }

    /// Queues again every failed leaf of the subtree.
    pub fn retry_download_node(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        self.batched(|storage| {
            for leaf in storage.tree.leaf_ids(id) {
                if storage.leaf_status(&leaf).0 == NodeStatus::Error {
                    storage.enqueue_leaf(&leaf);
                }
            }
            Ok(())
        })
    }

    /// Queues every out-of-date leaf of the subtree, as a diff when one
    /// applies to the local version.
    pub fn update_node(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        self.batched(|storage| {
            for leaf in storage.tree.leaf_ids(id) {
                if storage.leaf_status(&leaf).0 == NodeStatus::OnDiskOutOfDate {
                    storage.enqueue_leaf(&leaf);
                }
            }
            Ok(())
        })
    }

    /// Drops every queued or running transfer of the subtree and clears
    /// failure marks. Leaves fall back to their stable state.
    ///
    /// A file that cannot be removed does not stop the walk: every leaf is
    /// still dequeued and reported, and the first error is returned.
    pub fn cancel_download_node(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        self.batched(|storage| {
            let mut first_error = None;
            for leaf in storage.tree.leaf_ids(id) {
                let cleanup = storage.cancel_leaf_transfer(&leaf);
                let cancelled = cleanup.is_some();
                if let Some(Err(e)) = cleanup {
                    keep_first(&mut first_error, &leaf, e);
                }
                let was_failed = storage.failed.remove(&leaf).is_some();
                storage.just_downloaded.remove(&leaf);
                if cancelled || was_failed {
                    storage.notify_leaf(&leaf);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    /// Removes every local file of every leaf of the subtree, cancelling
    /// transfers first. Like cancel, a failed removal is reported after the
    /// whole subtree has been processed.
    pub fn delete_node(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        let current = self.tree.version();

        self.batched(|storage| {
            let mut first_error = None;
            for leaf in storage.tree.leaf_ids(id) {
                let cleanup = storage.cancel_leaf_transfer(&leaf);
                let cancelled = cleanup.is_some();
                if let Some(Err(e)) = cleanup {
                    keep_first(&mut first_error, &leaf, e);
                }
                let had_files = storage.registry.latest(&leaf).is_some();

                let removed = storage
                    .registry
                    .remove_all(&leaf)
                    .and_then(|_| {
                        storage
                            .registry
                            .delete_download_artifacts(&leaf, current, FileKind::Map)
                    })
                    .and_then(|_| {
                        storage
                            .registry
                            .delete_download_artifacts(&leaf, current, FileKind::Diff)
                    });
                if let Err(e) = removed {
                    keep_first(&mut first_error, &leaf, e.into());
                }
                storage.diffs.remove_diff(&leaf);
                storage.not_applied_diffs.retain(|d| d != &leaf);
                let was_failed = storage.failed.remove(&leaf).is_some();
                storage.just_downloaded.remove(&leaf);

                if cancelled || had_files || was_failed {
                    info!(country_id = %leaf, "Deleted region");
                    storage.notify_leaf(&leaf);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    /// Announces the region the user is in. Delivered immediately.
    pub fn set_current_region(&mut self, id: &str) -> StorageResult<()> {
        self.ensure_known(id)?;
        self.current_region = Some(id.to_string());
        self.notifier.current_region_changed(id.to_string());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Starts waiting requests while the concurrency policy allows.
    ///
    /// A request that cannot start (downloads disallowed, not enough space,
    /// no version directory) fails its leaf and the next one is tried.
    pub fn dispatch_queue(&mut self) {
        let mut failures = 0usize;
        while self
            .config
            .concurrency
            .allows_another(self.queue.active_count())
        {
            let Some(next) = self.queue.next_waiting() else {
                break;
            };
            let id = next.country_id.clone();
            if !self.start_transfer(&id) {
                failures += 1;
            }
        }
        if failures > 0 {
            self.queue_changed();
        }
    }

    /// Returns false when the request failed instead of starting.
    fn start_transfer(&mut self, id: &str) -> bool {
        if !self.policy.is_downloading_allowed() {
            warn!(country_id = id, "Downloading is not allowed");
            self.fail_leaf(id, NodeErrorCode::Network);
            return false;
        }

        let Some(request) = self.queue.get(id) else {
            return false;
        };
        let kind = request.kind;
        let target = request.target_version;
        let base = request.diff_base_version;
        let bytes_total = request.bytes_total;
        let sha256 = request.sha256.clone();
        let ticket = request.ticket;

        if !self.diffs.is_enough_space_for_download(bytes_total) {
            warn!(country_id = id, bytes = bytes_total, "Not enough free space");
            self.fail_leaf(id, NodeErrorCode::OutOfDiskSpace);
            return false;
        }
        if let Err(e) = self.registry.prepare_version_dir(target) {
            error!(country_id = id, error = %e, "Cannot prepare version directory");
            self.fail_leaf(id, NodeErrorCode::Unknown);
            return false;
        }

        let file = local::file_name(id, kind);
        let urls = self
            .config
            .servers
            .iter()
            .map(|server| match (kind, base) {
                (FileKind::Diff, Some(base)) => {
                    format!("{}/diffs/{}/{}/{}", server, base, target, file)
                }
                _ => format!("{}/maps/{}/{}", server, target, file),
            })
            .collect();

        let job = TransferJob {
            country_id: id.to_string(),
            kind,
            urls,
            destination: local::download_path(self.registry.root(), target, id, kind),
            expected_size: bytes_total,
            sha256,
        };
        let reporter = TransferReporter::new(id.to_string(), ticket, self.completion_tx.clone());
        let handle = self.transport.start(job, reporter);

        if let Some(request) = self.queue.get_mut(id) {
            request.start_download(handle);
        }
        info!(country_id = id, ?kind, version = target, bytes = bytes_total, "Transfer started");
        self.notify_leaf(id);
        true
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Queues one leaf. Already queued leaves are left alone.
    pub(crate) fn enqueue_leaf(&mut self, id: &str) {
        if self.queue.contains(id) {
            return;
        }
        self.failed.remove(id);

        let Some(node) = self.tree.get(id) else {
            return;
        };
        let current = self.tree.version();
        let local_version = self.registry.latest_map(id).map(|f| f.version);
        if local_version == Some(current) {
            self.notify_leaf(id);
            return;
        }

        let destination = local::version_directory(self.registry.root(), current);
        let request = match local_version {
            Some(base) if self.diffs.has_diff(id, base, current) => {
                let size = self.diffs.diff_size(id).unwrap_or(node.size);
                TransferRequest::diff(id, base, current, destination, size)
            }
            _ => TransferRequest::full(id, current, destination, node.size)
                .with_sha256(node.sha256.clone()),
        };

        let (queued, _) = self.queue.enqueue(request);
        debug!(
            country_id = id,
            kind = ?queued.kind,
            bytes = queued.bytes_total,
            ticket = queued.ticket,
            "Enqueued"
        );
        self.notify_leaf(id);
    }

    /// Removes the leaf's request, stops its work and deletes its
    /// temporaries.
    ///
    /// `None` when nothing was queued. Otherwise the request is gone even
    /// if removing its files failed.
    pub(crate) fn cancel_leaf_transfer(&mut self, id: &str) -> Option<StorageResult<()>> {
        let request = self.queue.remove(id)?;
        request.cancel();

        let target = request.target_version;
        let mut cleanup = self
            .registry
            .delete_download_artifacts(id, target, request.kind);
        if request.is_diff() {
            // The diff may already be promoted and half applied.
            cleanup = cleanup
                .and_then(|_| self.registry.remove_file(id, target, FileKind::Diff))
                .and_then(|_| {
                    self.registry
                        .delete_download_artifacts(id, target, FileKind::Map)
                });
        }
        debug!(country_id = id, ticket = request.ticket, "Transfer cancelled");
        Some(cleanup.map_err(Into::into))
    }

    /// Marks a leaf failed and drops its request.
    pub(crate) fn fail_leaf(&mut self, id: &str, code: NodeErrorCode) {
        self.queue.remove(id);
        self.just_downloaded.remove(id);
        self.failed.insert(id.to_string(), code);
        warn!(country_id = id, error = %code, "Region failed");
        self.notify_leaf(id);
    }

    /// Records the leaf's current status with the notifier.
    pub(crate) fn notify_leaf(&self, id: &str) {
        let (status, error) = self.leaf_status(id);
        self.notifier.status_changed(StatusChange {
            country_id: id.to_string(),
            status,
            error,
            is_leaf: true,
        });
    }

    /// Bookkeeping after any change to the queue's membership.
    pub(crate) fn queue_changed(&mut self) {
        if self.queue.is_empty() {
            self.just_downloaded.clear();
        }
        if self.config.persist_queue {
            if let Err(e) = self.save_queue() {
                warn!(error = %e, "Failed to persist download queue");
            }
        }
    }

    /// Runs a multi-leaf operation in one batching scope, followed by the
    /// queue bookkeeping and the dispatch step. Everything the call changes,
    /// including transfers it starts, reaches observers as a single batch.
    pub(crate) fn batched<F>(&mut self, work: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Self) -> StorageResult<()>,
    {
        let _batch = self.notifier.start_batching();
        let result = work(self);
        self.queue_changed();
        self.dispatch_queue();
        result
    }
}

fn keep_first(first: &mut Option<StorageError>, id: &str, error: StorageError) {
    warn!(country_id = id, error = %error, "Cannot remove region files");
    first.get_or_insert(error);
}
