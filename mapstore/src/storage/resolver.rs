//! Read-only queries: statuses, attributes, navigation and progress.
//!
//! Nothing here is cached. Every answer is derived from the catalog, the
//! registry and the queue at the moment of the call.

use chrono::{NaiveDate, Utc};
use tracing::warn;

use super::attrs::{aggregate_status, NodeAttrs, NodeStatuses};
use super::{Storage, StorageResult};
use crate::country::{
    CountryId, CountryIdAndName, CountryNode, DataVersion, NodeErrorCode, NodeStatus, Progress,
};
use crate::diff::UpdateInfo;
use crate::local::FileKind;

/// Local data older than the catalog by this much can no longer be edited.
const MAX_DAYS_BEHIND_CATALOG: i64 = 31 * 3;

/// Local data older than this can no longer be edited.
const MAX_DAYS_WITHOUT_EDITS: i64 = 31 * 6;

impl Storage {
    // -------------------------------------------------------------------------
    // Status derivation
    // -------------------------------------------------------------------------

    /// Status of a single leaf.
    pub(crate) fn leaf_status(&self, id: &str) -> (NodeStatus, NodeErrorCode) {
        if let Some(code) = self.failed.get(id) {
            return (NodeStatus::Error, *code);
        }
        if let Some(request) = self.queue.get(id) {
            let status = if request.is_active() {
                NodeStatus::Downloading
            } else {
                NodeStatus::InQueue
            };
            return (status, NodeErrorCode::None);
        }
        let status = match self.registry.latest_map(id) {
            None => NodeStatus::NotDownloaded,
            Some(local) if local.version < self.tree.version() => NodeStatus::OnDiskOutOfDate,
            Some(_) => NodeStatus::OnDisk,
        };
        (status, NodeErrorCode::None)
    }

    /// Status of any node. Groups aggregate over their distinct leaves.
    pub(crate) fn node_status(&self, id: &str) -> (NodeStatus, NodeErrorCode) {
        aggregate_status(
            self.tree
                .leaves(id)
                .into_iter()
                .map(|leaf| self.leaf_status(&leaf.id)),
        )
    }

    fn leaf_progress(&self, leaf: &CountryNode) -> Progress {
        if let Some(request) = self.queue.get(&leaf.id) {
            return request.progress();
        }
        if self.just_downloaded.contains(&leaf.id) {
            return Progress::complete(leaf.size);
        }
        Progress::default()
    }

    /// Transfer progress summed over every leaf of the subtree.
    pub(crate) fn subtree_progress(&self, id: &str) -> Progress {
        self.tree
            .leaves(id)
            .into_iter()
            .map(|leaf| self.leaf_progress(leaf))
            .sum()
    }

    fn id_and_name(&self, id: &str) -> CountryIdAndName {
        match self.tree.get(id) {
            Some(node) => CountryIdAndName::new(id, self.names.name(node)),
            None => CountryIdAndName::new(id, id),
        }
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    pub fn get_node_attrs(&self, id: &str) -> StorageResult<NodeAttrs> {
        let node = self.node(id)?;
        let leaves = self.tree.leaves(id);

        let mut mwm_size = 0u64;
        let mut local_counter = 0usize;
        let mut local_size = 0u64;
        let mut downloading_counter = 0usize;
        let mut downloading_size = 0u64;
        let mut progress = Progress::default();
        let mut statuses = Vec::with_capacity(leaves.len());

        for leaf in &leaves {
            mwm_size += leaf.size;
            if let Some(local) = self.registry.latest_map(&leaf.id) {
                local_counter += 1;
                local_size += local.size(FileKind::Map);
            }
            if self.queue.contains(&leaf.id) {
                downloading_counter += 1;
                downloading_size += leaf.size;
            }
            statuses.push(self.leaf_status(&leaf.id));
            progress += self.leaf_progress(leaf);
        }

        let (status, error) = aggregate_status(statuses);
        if status == NodeStatus::OnDisk {
            progress = Progress::complete(mwm_size);
        }

        let parent_info = if node.parents.is_empty() {
            vec![CountryIdAndName::default()]
        } else {
            node.parents.iter().map(|p| self.id_and_name(p)).collect()
        };
        let topmost_parent_info = self
            .tree
            .topmost_parents(id)
            .iter()
            .map(|p| self.id_and_name(p))
            .collect();

        Ok(NodeAttrs {
            mwm_counter: leaves.len(),
            mwm_size,
            local_counter,
            local_size,
            downloading_counter,
            downloading_size,
            status,
            error,
            local_name: self.names.name(node),
            local_description: self.names.description(node),
            progress,
            present: node.is_leaf() && self.registry.is_present(id),
            parent_info,
            topmost_parent_info,
        })
    }

    pub fn get_node_statuses(&self, id: &str) -> StorageResult<NodeStatuses> {
        let node = self.node(id)?;
        let (status, error) = self.node_status(id);
        Ok(NodeStatuses {
            status,
            error,
            is_group: node.is_group,
        })
    }

    pub fn get_node_local_name(&self, id: &str) -> StorageResult<String> {
        self.node(id).map(|node| self.names.name(node))
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    pub fn get_root_id(&self) -> &str {
        self.tree.root_id()
    }

    pub fn get_children(&self, id: &str) -> StorageResult<Vec<CountryId>> {
        self.node(id).map(|node| node.children.clone())
    }

    /// Descendant leaves split into those with a local map and the rest.
    pub fn get_children_in_groups(
        &self,
        id: &str,
    ) -> StorageResult<(Vec<CountryId>, Vec<CountryId>)> {
        self.ensure_known(id)?;
        Ok(self
            .tree
            .leaf_ids(id)
            .into_iter()
            .partition(|leaf| self.registry.is_present(leaf)))
    }

    /// Direct children that are queued or downloading.
    pub fn get_queued_children(&self, id: &str) -> StorageResult<Vec<CountryId>> {
        let node = self.node(id)?;
        Ok(node
            .children
            .iter()
            .filter(|child| {
                matches!(
                    self.node_status(child).0,
                    NodeStatus::Downloading | NodeStatus::InQueue
                )
            })
            .cloned()
            .collect())
    }

    /// Ancestors of a group up to and including the root.
    ///
    /// Empty for leaves, for unknown ids and when any node on the way has
    /// more than one parent.
    pub fn get_group_node_path_to_root(&self, id: &str) -> Vec<CountryId> {
        let Some(node) = self.tree.get(id) else {
            warn!(country_id = id, "Path to root requested for unknown id");
            return Vec::new();
        };
        if node.is_leaf() {
            warn!(country_id = id, "Path to root requested for a leaf");
            return Vec::new();
        }

        let mut path = Vec::new();
        let mut current = id;
        loop {
            match self.tree.parents(current) {
                [] => break,
                [parent] => {
                    path.push(parent.clone());
                    current = parent.as_str();
                }
                _ => {
                    warn!(country_id = current, "Node has several parents");
                    return Vec::new();
                }
            }
        }
        path
    }

    /// The only direct parent, if there is exactly one.
    pub fn get_parent_id_for(&self, id: &str) -> Option<CountryId> {
        match self.tree.parents(id) {
            [parent] => Some(parent.clone()),
            _ => None,
        }
    }

    /// The only ancestor directly below the root, if there is exactly one.
    pub fn get_topmost_parent_for(&self, id: &str) -> Option<CountryId> {
        let mut topmost = self.tree.topmost_parents(id);
        if topmost.len() == 1 {
            topmost.pop()
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Progress and queue state
    // -------------------------------------------------------------------------

    /// Sum of the attribute progress of each id. Groups are not expanded
    /// beyond their own attributes, and an empty list gives `(0, 0)`.
    pub fn get_overall_progress(&self, ids: &[CountryId]) -> StorageResult<Progress> {
        let mut total = Progress::default();
        for id in ids {
            total += self.get_node_attrs(id)?.progress;
        }
        Ok(total)
    }

    /// True while anything is queued, downloading or applying a diff.
    pub fn is_download_in_progress(&self) -> bool {
        !self.queue.is_empty()
    }

    // -------------------------------------------------------------------------
    // Versions
    // -------------------------------------------------------------------------

    /// Version of the newest local map of a leaf.
    pub fn get_version(&self, id: &str) -> Option<DataVersion> {
        self.registry.latest_map(id).map(|local| local.version)
    }

    /// True when any file of the leaf is registered.
    pub fn is_node_downloaded(&self, id: &str) -> bool {
        self.registry.latest(id).is_some()
    }

    pub fn has_latest_version(&self, id: &str) -> bool {
        self.tree.contains(id) && self.node_status(id).0 == NodeStatus::OnDisk
    }

    /// Whether user edits on the local data of a leaf are still accepted.
    pub fn is_allowed_to_edit_version(&self, id: &str) -> StorageResult<bool> {
        self.ensure_known(id)?;
        Ok(match self.node_status(id).0 {
            NodeStatus::OnDisk => true,
            NodeStatus::OnDiskOutOfDate => self
                .get_version(id)
                .map(|local| {
                    version_is_editable(local, self.tree.version(), Utc::now().date_naive())
                })
                .unwrap_or(false),
            _ => false,
        })
    }

    // -------------------------------------------------------------------------
    // Updates
    // -------------------------------------------------------------------------

    /// What updating every out-of-date leaf of the subtree would transfer.
    pub fn get_update_info(&self, id: &str) -> StorageResult<UpdateInfo> {
        self.ensure_known(id)?;
        let current = self.tree.version();
        let mut info = UpdateInfo::default();

        for leaf in self.tree.leaves(id) {
            if self.leaf_status(&leaf.id).0 != NodeStatus::OnDiskOutOfDate {
                continue;
            }
            let Some(local) = self.registry.latest_map(&leaf.id) else {
                continue;
            };
            let transfer = if self.diffs.has_diff(&leaf.id, local.version, current) {
                self.diffs.diff_size(&leaf.id).unwrap_or(leaf.size)
            } else {
                leaf.size
            };
            info.files_to_update += 1;
            info.total_download_bytes += transfer;
            info.max_file_bytes = info.max_file_bytes.max(leaf.size);
            info.size_difference = info
                .size_difference
                .saturating_add(size_delta(leaf.size, local.size(FileKind::Map)));
        }
        Ok(info)
    }

    pub fn is_enough_space_for_update(&self, id: &str) -> StorageResult<bool> {
        let info = self.get_update_info(id)?;
        Ok(self
            .diffs
            .is_enough_space_for_update(&info, self.config.concurrency))
    }

    pub fn is_enough_space_for_download(&self, bytes: u64) -> bool {
        self.diffs.is_enough_space_for_download(bytes)
    }

    pub fn is_auto_retry_exhausted(&self) -> bool {
        self.policy.is_auto_retry_exhausted()
    }

    pub fn current_region(&self) -> Option<&str> {
        self.current_region.as_deref()
    }
}

/// Parses a `YYMMDD` data version.
fn version_date(version: DataVersion) -> Option<NaiveDate> {
    let year = i32::try_from(version / 10_000).ok()?;
    let month = u32::try_from(version / 100 % 100).ok()?;
    let day = u32::try_from(version % 100).ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

fn version_is_editable(local: DataVersion, current: DataVersion, today: NaiveDate) -> bool {
    let (Some(local), Some(current)) = (version_date(local), version_date(current)) else {
        return false;
    };
    (current - local).num_days() < MAX_DAYS_BEHIND_CATALOG
        && (today - local).num_days() < MAX_DAYS_WITHOUT_EDITS
}

/// Signed growth from `local` to `remote` bytes, clamped to `i64`.
fn size_delta(remote: u64, local: u64) -> i64 {
    if remote >= local {
        i64::try_from(remote - local).unwrap_or(i64::MAX)
    } else {
        i64::try_from(local - remote).map_or(i64::MIN, |shrink| -shrink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_version_date() {
        assert_eq!(version_date(250131), Some(date(2025, 1, 31)));
        assert_eq!(version_date(251341), None);
        assert_eq!(version_date(-1), None);
    }

    #[test]
    fn test_recent_out_of_date_version_is_editable() {
        assert!(version_is_editable(250101, 250201, date(2025, 3, 1)));
    }

    #[test]
    fn test_far_behind_catalog_is_not_editable() {
        assert!(!version_is_editable(250101, 250601, date(2025, 6, 2)));
    }

    #[test]
    fn test_stale_local_data_is_not_editable() {
        assert!(!version_is_editable(250101, 250201, date(2025, 9, 1)));
    }

    #[test]
    fn test_size_delta_is_signed_and_clamped() {
        assert_eq!(size_delta(300, 100), 200);
        assert_eq!(size_delta(100, 300), -200);
        assert_eq!(size_delta(u64::MAX, 0), i64::MAX);
        assert_eq!(size_delta(0, u64::MAX), i64::MIN);
        assert_eq!(size_delta(u64::MAX, u64::MAX - 5), 5);
    }
}
