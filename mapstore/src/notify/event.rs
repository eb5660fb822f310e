//! Events delivered to storage observers.

use crate::country::{CountryId, NodeErrorCode, NodeStatus, Progress};

/// Handle returned by a subscription.
pub type SubscriptionId = u64;

/// A leaf's status at the moment the change was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub country_id: CountryId,
    pub status: NodeStatus,
    pub error: NodeErrorCode,
    /// Always `true` for changes recorded by the storage. Only leaves carry
    /// state; observers showing a group re-read it with
    /// `get_node_statuses` when one of its leaves changes.
    pub is_leaf: bool,
}

/// Everything an observer can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// One batch of status changes, in the order they happened.
    StatusChanged(Vec<StatusChange>),
    /// Transfer progress of a leaf or of one of its ancestor groups.
    ProgressChanged {
        country_id: CountryId,
        progress: Progress,
    },
    /// The region the user is currently in changed.
    CurrentRegionChanged(CountryId),
}
