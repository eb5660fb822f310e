//! Knowledge of available binary diffs.
//!
//! Diff information arrives asynchronously from the server after startup
//! (see [`DiffManager::set_diff_info`]). Until then the status is
//! [`DiffStatus::NotReady`] and every update is a full download.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::space::{fits_with_slack, FreeSpaceSource};
use crate::config::ConcurrencyPolicy;
use crate::country::{CountryId, DataVersion};

/// Availability of the diff scheme as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    /// No answer from the server yet.
    NotReady,
    /// Diff information is loaded.
    Available,
    /// The server has no diffs, or the scheme was aborted.
    NotAvailable,
}

/// One available diff for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffInfo {
    /// Size of the diff file in bytes.
    pub size: u64,
    /// Local version the diff applies to.
    pub base_version: DataVersion,
    /// Set once the diff has been applied successfully.
    pub applied: bool,
}

impl DiffInfo {
    pub fn new(size: u64, base_version: DataVersion) -> Self {
        Self {
            size,
            base_version,
            applied: false,
        }
    }
}

/// Inputs to the update space check for a subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Number of leaves that would be updated.
    pub files_to_update: usize,
    /// Sum of the transfer sizes (diff size when a diff exists).
    pub total_download_bytes: u64,
    /// Largest single leaf size involved in the update.
    pub max_file_bytes: u64,
    /// New total size minus current local size; negative when shrinking.
    pub size_difference: i64,
}

pub struct DiffManager {
    status: DiffStatus,
    diffs: HashMap<CountryId, DiffInfo>,
    free_space: Arc<dyn FreeSpaceSource>,
    applier_available: bool,
}

impl std::fmt::Debug for DiffManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffManager")
            .field("status", &self.status)
            .field("diffs", &self.diffs.len())
            .field("applier_available", &self.applier_available)
            .finish()
    }
}

impl DiffManager {
    pub fn new(free_space: Arc<dyn FreeSpaceSource>) -> Self {
        Self {
            status: DiffStatus::NotReady,
            diffs: HashMap::new(),
            free_space,
            applier_available: false,
        }
    }

    /// Diffs can only be selected when something can apply them.
    pub fn set_applier_available(&mut self, available: bool) {
        self.applier_available = available;
    }

    pub fn status(&self) -> DiffStatus {
        self.status
    }

    /// Installs the server's diff list, replacing any previous one.
    pub fn set_diff_info(&mut self, diffs: HashMap<CountryId, DiffInfo>) {
        self.status = if diffs.is_empty() {
            DiffStatus::NotAvailable
        } else {
            DiffStatus::Available
        };
        info!(count = diffs.len(), status = ?self.status, "Diff info received");
        self.diffs = diffs;
    }

    /// Drops every diff. Used when the server reports a diff as missing.
    pub fn abort_diff_scheme(&mut self) {
        if self.status != DiffStatus::NotAvailable {
            warn!("Aborting diff scheme");
        }
        self.status = DiffStatus::NotAvailable;
        self.diffs.clear();
    }

    /// True when an unapplied diff from `from` to `to` can be used.
    ///
    /// `to` must be the version the diff list was published for, which is
    /// always the catalog's current version.
    pub fn has_diff(&self, id: &str, from: DataVersion, to: DataVersion) -> bool {
        if from >= to {
            return false;
        }
        self.usable(id)
            .map(|d| d.base_version == from)
            .unwrap_or(false)
    }

    /// True when any unapplied diff is known for the region.
    pub fn has_diff_for(&self, id: &str) -> bool {
        self.usable(id).is_some()
    }

    pub fn diff_size(&self, id: &str) -> Option<u64> {
        self.usable(id).map(|d| d.size)
    }

    pub fn base_version(&self, id: &str) -> Option<DataVersion> {
        self.usable(id).map(|d| d.base_version)
    }

    pub fn mark_applied(&mut self, id: &str) {
        if let Some(diff) = self.diffs.get_mut(id) {
            diff.applied = true;
        }
    }

    pub fn remove_diff(&mut self, id: &str) {
        self.diffs.remove(id);
    }

    /// True iff `bytes` plus the fixed slack fits into the free space.
    pub fn is_enough_space_for_download(&self, bytes: u64) -> bool {
        fits_with_slack(bytes, self.free_space.free_bytes())
    }

    /// Space check for an update.
    ///
    /// The old file stays on disk until the new one is complete, so the
    /// largest single file is always added on top of what gets downloaded.
    /// With one transfer at a time only the largest transfer is in flight;
    /// otherwise all of them can be.
    pub fn is_enough_space_for_update(&self, info: &UpdateInfo, policy: ConcurrencyPolicy) -> bool {
        let in_flight = match policy {
            ConcurrencyPolicy::OneAtATime => info.max_file_bytes,
            ConcurrencyPolicy::Unlimited => info.total_download_bytes,
        };
        in_flight
            .checked_add(info.max_file_bytes)
            .map(|needed| self.is_enough_space_for_download(needed))
            .unwrap_or(false)
    }

    fn usable(&self, id: &str) -> Option<&DiffInfo> {
        if !self.applier_available || self.status != DiffStatus::Available {
            return None;
        }
        self.diffs.get(id).filter(|d| !d.applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{FixedFreeSpace, DOWNLOAD_SLACK_BYTES};

    fn manager(free: u64) -> DiffManager {
        let mut m = DiffManager::new(Arc::new(FixedFreeSpace(free)));
        m.set_applier_available(true);
        m
    }

    fn with_luna_diff(m: &mut DiffManager) {
        let mut diffs = HashMap::new();
        diffs.insert("Luna".to_string(), DiffInfo::new(300, 1));
        m.set_diff_info(diffs);
    }

    #[test]
    fn test_not_ready_has_no_diffs() {
        let m = manager(0);
        assert_eq!(m.status(), DiffStatus::NotReady);
        assert!(!m.has_diff("Luna", 1, 2));
        assert_eq!(m.diff_size("Luna"), None);
    }

    #[test]
    fn test_has_diff_matches_base_version() {
        let mut m = manager(0);
        with_luna_diff(&mut m);
        assert_eq!(m.status(), DiffStatus::Available);
        assert!(m.has_diff("Luna", 1, 2));
        assert!(!m.has_diff("Luna", 0, 2));
        assert!(!m.has_diff("Luna", 2, 2));
        assert!(!m.has_diff("Mars", 1, 2));
        assert_eq!(m.diff_size("Luna"), Some(300));
    }

    #[test]
    fn test_applied_and_removed_diffs_are_unusable() {
        let mut m = manager(0);
        with_luna_diff(&mut m);
        m.mark_applied("Luna");
        assert!(!m.has_diff_for("Luna"));

        with_luna_diff(&mut m);
        m.remove_diff("Luna");
        assert!(!m.has_diff_for("Luna"));
    }

    #[test]
    fn test_no_applier_means_no_diffs() {
        let mut m = manager(0);
        m.set_applier_available(false);
        with_luna_diff(&mut m);
        assert!(!m.has_diff("Luna", 1, 2));
    }

    #[test]
    fn test_abort_diff_scheme() {
        let mut m = manager(0);
        with_luna_diff(&mut m);
        m.abort_diff_scheme();
        assert_eq!(m.status(), DiffStatus::NotAvailable);
        assert!(!m.has_diff_for("Luna"));
    }

    #[test]
    fn test_empty_diff_list_is_not_available() {
        let mut m = manager(0);
        m.set_diff_info(HashMap::new());
        assert_eq!(m.status(), DiffStatus::NotAvailable);
    }

    #[test]
    fn test_space_for_update_depends_on_policy() {
        let info = UpdateInfo {
            files_to_update: 3,
            total_download_bytes: 3_000,
            max_file_bytes: 1_000,
            size_difference: 0,
        };
        // Enough for 2 * max (one at a time), not for total + max.
        let m = manager(DOWNLOAD_SLACK_BYTES + 2_000);
        assert!(m.is_enough_space_for_update(&info, ConcurrencyPolicy::OneAtATime));
        assert!(!m.is_enough_space_for_update(&info, ConcurrencyPolicy::Unlimited));

        let m = manager(DOWNLOAD_SLACK_BYTES + 4_000);
        assert!(m.is_enough_space_for_update(&info, ConcurrencyPolicy::Unlimited));
    }

    #[test]
    fn test_space_for_download() {
        let m = manager(DOWNLOAD_SLACK_BYTES);
        assert!(m.is_enough_space_for_download(0));
        assert!(!m.is_enough_space_for_download(1));
    }
}
