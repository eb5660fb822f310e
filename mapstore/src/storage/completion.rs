//! Handling of transfer and diff completions on the owning context.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::Storage;
use crate::country::{CountryId, DataVersion, NodeErrorCode, Progress};
use crate::diff::{DiffApplyParams, DiffApplyResult, DiffInfo, DiffReporter};
use crate::local::{self, FileKind};
use crate::queue::Completion;
use crate::transport::{TransferFailure, TransferOutcome};

impl Storage {
    /// Applies one completion. Completions for a request that is no longer
    /// queued, or was re-queued since, are dropped.
    pub fn handle_completion(&mut self, completion: Completion) {
        let id = completion.country_id().to_string();
        let ticket = completion.ticket();
        if self.queue.get_ticketed_mut(&id, ticket).is_none() {
            trace!(country_id = %id, ticket, "Dropping stale completion");
            return;
        }

        match completion {
            Completion::TransferProgress { progress, .. } => {
                self.on_transfer_progress(&id, progress);
            }
            Completion::TransferFinished { outcome, .. } => {
                self.on_transfer_finished(&id, outcome);
                self.queue_changed();
            }
            Completion::DiffApplied { result, .. } => {
                self.on_diff_applied(&id, result);
                self.queue_changed();
            }
        }
    }

    fn on_transfer_progress(&mut self, id: &str, reported: Progress) {
        let Some(stored) = self
            .queue
            .get_mut(id)
            .and_then(|request| request.update_progress(reported))
        else {
            return;
        };
        self.notifier.progress_changed(id, stored);
        self.report_ancestor_progress(id);
    }

    /// Reports subtree progress for every ancestor except the root.
    fn report_ancestor_progress(&self, id: &str) {
        let mut ancestors: Vec<&str> = Vec::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for parent in self.tree.parents(current) {
                if parent == self.tree.root_id() || ancestors.contains(&parent.as_str()) {
                    continue;
                }
                ancestors.push(parent.as_str());
                stack.push(parent.as_str());
            }
        }
        for ancestor in ancestors {
            self.notifier
                .progress_changed(ancestor, self.subtree_progress(ancestor));
        }
    }

    fn on_transfer_finished(&mut self, id: &str, outcome: TransferOutcome) {
        let Some(kind) = self.queue.get(id).map(|r| r.kind) else {
            return;
        };
        match outcome {
            TransferOutcome::Completed => match kind {
                FileKind::Map => self.finish_map_transfer(id),
                FileKind::Diff => self.start_diff_apply(id),
            },
            TransferOutcome::Failed(TransferFailure::Cancelled) => {
                // Stopped without a cancel from us; back to the stable state.
                debug!(country_id = id, "Transfer stopped by transport");
                self.queue.remove(id);
                self.notify_leaf(id);
            }
            TransferOutcome::Failed(failure) => self.on_transfer_failed(id, kind, failure),
        }
    }

    fn finish_map_transfer(&mut self, id: &str) {
        let Some(target) = self.queue.get(id).map(|r| r.target_version) else {
            return;
        };
        if let Err(e) = self.registry.promote_download(id, target, FileKind::Map) {
            error!(country_id = id, error = %e, "Cannot register downloaded map");
            self.fail_leaf(id, NodeErrorCode::Unknown);
            return;
        }
        self.finish_leaf(id);
    }

    /// Final step of every successful transfer: old versions go, the leaf
    /// leaves the queue and reports full progress.
    fn finish_leaf(&mut self, id: &str) {
        let Some(request) = self.queue.remove(id) else {
            return;
        };
        let target = request.target_version;
        if let Err(e) = self.registry.remove_older_than(id, target) {
            warn!(country_id = id, error = %e, "Cannot remove older versions");
        }

        let total = request.progress().bytes_total;
        self.just_downloaded.insert(id.to_string());
        self.notifier.progress_changed(id, Progress::complete(total));
        self.report_ancestor_progress(id);

        info!(country_id = id, version = target, bytes = total, "Region downloaded");
        self.notify_leaf(id);
    }

    fn on_transfer_failed(&mut self, id: &str, kind: FileKind, failure: TransferFailure) {
        warn!(country_id = id, ?kind, error = %failure, "Transfer failed");
        let target = self.queue.get(id).map(|r| r.target_version);

        if let (TransferFailure::IntegrityMismatch { .. }, Some(target)) = (&failure, target) {
            // Nothing worth resuming.
            if let Err(e) = self.registry.delete_download_artifacts(id, target, kind) {
                warn!(country_id = id, error = %e, "Cannot remove corrupt download");
            }
        }

        if kind == FileKind::Diff {
            if failure == TransferFailure::FileNotFound {
                self.diffs.abort_diff_scheme();
                self.convert_queued_diffs_to_full();
            } else {
                self.diffs.remove_diff(id);
            }
        }

        self.fail_leaf(id, failure.error_code());
    }

    // -------------------------------------------------------------------------
    // Diffs
    // -------------------------------------------------------------------------

    fn start_diff_apply(&mut self, id: &str) {
        let Some((target, ticket)) = self.queue.get(id).map(|r| (r.target_version, r.ticket))
        else {
            return;
        };
        if let Err(e) = self.registry.promote_download(id, target, FileKind::Diff) {
            error!(country_id = id, error = %e, "Cannot register downloaded diff");
            self.fail_leaf(id, NodeErrorCode::Unknown);
            return;
        }

        let Some(applier) = self.applier.clone() else {
            error!(country_id = id, "Diff downloaded but no applier configured");
            self.discard_diff(id, target);
            self.fail_leaf(id, NodeErrorCode::Unknown);
            return;
        };
        let Some(old_map) = self.registry.latest_map(id).map(|f| f.path(FileKind::Map)) else {
            warn!(country_id = id, "Local map disappeared before applying diff");
            self.discard_diff(id, target);
            self.fail_leaf(id, NodeErrorCode::Unknown);
            return;
        };

        let root = self.registry.root();
        let params = DiffApplyParams {
            country_id: id.to_string(),
            old_map,
            diff: local::file_path(root, target, id, FileKind::Diff),
            output: local::download_path(root, target, id, FileKind::Map),
        };
        let cancel = CancellationToken::new();
        let reporter = DiffReporter::new(id.to_string(), ticket, self.completion_tx.clone());
        applier.start(params, reporter, cancel.clone());

        if let Some(request) = self.queue.get_mut(id) {
            request.start_applying(cancel);
        }
        debug!(country_id = id, version = target, "Applying diff");
    }

    fn on_diff_applied(&mut self, id: &str, result: DiffApplyResult) {
        let Some(target) = self.queue.get(id).map(|r| r.target_version) else {
            return;
        };
        match result {
            DiffApplyResult::Ok => {
                if let Err(e) = self.registry.promote_download(id, target, FileKind::Map) {
                    error!(country_id = id, error = %e, "Cannot register patched map");
                    self.discard_diff(id, target);
                    self.fail_leaf(id, NodeErrorCode::Unknown);
                    return;
                }
                if let Err(e) = self.registry.remove_file(id, target, FileKind::Diff) {
                    warn!(country_id = id, error = %e, "Cannot remove applied diff");
                }
                self.diffs.mark_applied(id);
                self.finish_leaf(id);
            }
            DiffApplyResult::Failed(reason) => {
                warn!(country_id = id, reason = %reason, "Diff application failed");
                self.discard_diff(id, target);
                self.diffs.remove_diff(id);
                self.fail_leaf(id, NodeErrorCode::Unknown);
            }
            DiffApplyResult::Cancelled => {
                debug!(country_id = id, "Diff application cancelled");
                self.discard_diff(id, target);
                self.queue.remove(id);
                self.notify_leaf(id);
            }
        }
    }

    /// Deletes the diff and any partial output of applying it.
    fn discard_diff(&mut self, id: &str, target: DataVersion) {
        let removed = self
            .registry
            .remove_file(id, target, FileKind::Diff)
            .and_then(|_| {
                self.registry
                    .delete_download_artifacts(id, target, FileKind::Map)
            });
        if let Err(e) = removed {
            warn!(country_id = id, error = %e, "Cannot remove diff files");
        }
    }

    /// Waiting diff requests that lost their diff become full transfers.
    fn convert_queued_diffs_to_full(&mut self) {
        for request in self.queue.iter_mut() {
            if !request.is_diff() || request.is_active() {
                continue;
            }
            if self.diffs.has_diff_for(&request.country_id) {
                continue;
            }
            let Some(node) = self.tree.get(&request.country_id) else {
                continue;
            };
            debug!(country_id = %request.country_id, "Diff gone, switching to full transfer");
            request.convert_to_full(node.size);
            request.sha256 = node.sha256.clone();
        }
    }

    /// Installs the server's diff list.
    ///
    /// Queued diffs that are no longer offered become full transfers. Diffs
    /// left on disk by an earlier run are either updated through again or
    /// deleted.
    pub fn on_diff_status_received(&mut self, diffs: HashMap<CountryId, DiffInfo>) {
        self.diffs.set_diff_info(diffs);
        self.convert_queued_diffs_to_full();

        let current = self.tree.version();
        let _ = self.batched(|storage| {
            for id in std::mem::take(&mut storage.not_applied_diffs) {
                if storage.diffs.has_diff_for(&id) {
                    if let Err(e) = storage.update_node(&id) {
                        warn!(country_id = %id, error = %e, "Cannot resume diff update");
                    }
                } else if let Err(e) = storage.registry.remove_file(&id, current, FileKind::Diff) {
                    warn!(country_id = %id, error = %e, "Cannot remove stale diff");
                }
            }
            Ok(())
        });
    }
}
