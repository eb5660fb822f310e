//! Core value types shared by the catalog, resolver and notifier.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Globally unique key naming a catalog node.
pub type CountryId = String;

/// Data release stamp (YYMMDD in practice).
pub type DataVersion = i64;

/// Status of a catalog node.
///
/// Leaves are always in exactly one of the non-`Mixed` states. Group status
/// is derived from the leaves below it on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Status could not be determined (e.g. a group without leaves).
    Undefined,
    /// A transfer or diff application is running.
    Downloading,
    /// Waiting in the download queue.
    InQueue,
    /// The last transfer failed; see [`NodeErrorCode`].
    Error,
    /// Present on disk, but an older data version than the catalog's.
    OnDiskOutOfDate,
    /// Present on disk at the catalog's data version.
    OnDisk,
    /// Not present on disk.
    NotDownloaded,
    /// Group only: descendant leaves disagree.
    Mixed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Undefined => "undefined",
            NodeStatus::Downloading => "downloading",
            NodeStatus::InQueue => "in queue",
            NodeStatus::Error => "error",
            NodeStatus::OnDiskOutOfDate => "on disk (out of date)",
            NodeStatus::OnDisk => "on disk",
            NodeStatus::NotDownloaded => "not downloaded",
            NodeStatus::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Why a leaf is in [`NodeStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeErrorCode {
    #[default]
    None,
    /// Transfer failed on the network side. Retryable.
    Network,
    /// Not enough free space. Never retried automatically.
    OutOfDiskSpace,
    /// Anything else. Retryable.
    Unknown,
}

impl fmt::Display for NodeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeErrorCode::None => "none",
            NodeErrorCode::Network => "network",
            NodeErrorCode::OutOfDiskSpace => "out of disk space",
            NodeErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Downloaded and total byte counts.
///
/// Progress values are additive: the progress of a set of disjoint leaves is
/// the sum of their individual progress values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
}

impl Progress {
    pub fn new(bytes_downloaded: u64, bytes_total: u64) -> Self {
        Self {
            bytes_downloaded,
            bytes_total,
        }
    }

    /// Progress of a finished transfer of `bytes`.
    pub fn complete(bytes: u64) -> Self {
        Self::new(bytes, bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_downloaded == self.bytes_total
    }
}

impl Add for Progress {
    type Output = Progress;

    fn add(self, rhs: Progress) -> Progress {
        Progress {
            bytes_downloaded: self.bytes_downloaded.saturating_add(rhs.bytes_downloaded),
            bytes_total: self.bytes_total.saturating_add(rhs.bytes_total),
        }
    }
}

impl AddAssign for Progress {
    fn add_assign(&mut self, rhs: Progress) {
        *self = *self + rhs;
    }
}

impl Sum for Progress {
    fn sum<I: Iterator<Item = Progress>>(iter: I) -> Progress {
        iter.fold(Progress::default(), Add::add)
    }
}

/// A node id paired with its localized display name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountryIdAndName {
    pub id: CountryId,
    pub name: String,
}

impl CountryIdAndName {
    pub fn new(id: impl Into<CountryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// True when both fields are empty.
    pub fn is_blank(&self) -> bool {
        self.id.is_empty() && self.name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_sum_of_empty_is_zero() {
        let total: Progress = Vec::<Progress>::new().into_iter().sum();
        assert_eq!(total, Progress::new(0, 0));
    }

    #[test]
    fn test_progress_add() {
        let mut p = Progress::new(10, 100);
        p += Progress::new(5, 50);
        assert_eq!(p, Progress::new(15, 150));
        assert!(!p.is_complete());
        assert!(Progress::complete(42).is_complete());
    }

    #[test]
    fn test_progress_add_saturates() {
        let p = Progress::new(u64::MAX, u64::MAX) + Progress::new(1, 1);
        assert_eq!(p, Progress::new(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_error_code_default_is_none() {
        assert_eq!(NodeErrorCode::default(), NodeErrorCode::None);
    }

    #[test]
    fn test_blank_id_and_name() {
        assert!(CountryIdAndName::default().is_blank());
        assert!(!CountryIdAndName::new("Luna", "Moon").is_blank());
    }
}
