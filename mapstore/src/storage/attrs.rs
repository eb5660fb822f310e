//! Attribute snapshots and group status derivation.

use crate::country::{CountryIdAndName, NodeErrorCode, NodeStatus, Progress};

/// Point-in-time view of one node. Never cached: compute a new one after
/// any change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttrs {
    /// Leaves in the subtree.
    pub mwm_counter: usize,
    /// Nominal size of all leaves in the subtree.
    pub mwm_size: u64,
    /// Leaves in the subtree with a local map file.
    pub local_counter: usize,
    /// Size of those local map files.
    pub local_size: u64,
    /// Leaves in the subtree that are queued or downloading.
    pub downloading_counter: usize,
    /// Nominal size of those leaves.
    pub downloading_size: u64,
    pub status: NodeStatus,
    pub error: NodeErrorCode,
    pub local_name: String,
    pub local_description: String,
    pub progress: Progress,
    /// A leaf with a registered local map. Always false for groups.
    pub present: bool,
    /// One entry per direct parent. The root has a single blank entry.
    pub parent_info: Vec<CountryIdAndName>,
    /// Ancestors directly below the root.
    pub topmost_parent_info: Vec<CountryIdAndName>,
}

impl NodeAttrs {
    /// Parent to display: only when there is exactly one, otherwise blank.
    pub fn direct_parent(&self) -> CountryIdAndName {
        single_or_blank(&self.parent_info)
    }

    /// Topmost parent to display: only when there is exactly one, otherwise
    /// blank.
    pub fn topmost_parent(&self) -> CountryIdAndName {
        single_or_blank(&self.topmost_parent_info)
    }
}

fn single_or_blank(list: &[CountryIdAndName]) -> CountryIdAndName {
    match list {
        [only] => only.clone(),
        _ => CountryIdAndName::default(),
    }
}

/// Status summary without size aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatuses {
    pub status: NodeStatus,
    pub error: NodeErrorCode,
    pub is_group: bool,
}

/// Derives a group's status from its leaves, in traversal order.
///
/// - no leaves → `Undefined`
/// - all leaves agree → that status
/// - some `Downloading`, no `Error` → `Downloading`
/// - some `Error`, no `Downloading` → `Error` (code of the first errored leaf)
/// - otherwise → `Mixed`
pub fn aggregate_status<I>(leaves: I) -> (NodeStatus, NodeErrorCode)
where
    I: IntoIterator<Item = (NodeStatus, NodeErrorCode)>,
{
    let mut first: Option<NodeStatus> = None;
    let mut uniform = true;
    let mut any_downloading = false;
    let mut first_error: Option<NodeErrorCode> = None;

    for (status, error) in leaves {
        match first {
            None => first = Some(status),
            Some(f) if f != status => uniform = false,
            Some(_) => {}
        }
        match status {
            NodeStatus::Downloading => any_downloading = true,
            NodeStatus::Error if first_error.is_none() => first_error = Some(error),
            _ => {}
        }
    }

    let Some(first) = first else {
        return (NodeStatus::Undefined, NodeErrorCode::None);
    };
    if uniform {
        return (first, first_error.unwrap_or_default());
    }
    match (any_downloading, first_error) {
        (true, None) => (NodeStatus::Downloading, NodeErrorCode::None),
        (false, Some(code)) => (NodeStatus::Error, code),
        _ => (NodeStatus::Mixed, NodeErrorCode::None),
    }
}
