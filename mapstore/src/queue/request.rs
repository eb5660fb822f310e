//! Download queue entries.

use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::country::{CountryId, DataVersion, Progress};
use crate::local::FileKind;
use crate::transport::TransferHandle;

/// Identifies one enqueue of a region.
///
/// Every enqueue gets a fresh ticket, so a completion reported for an older,
/// cancelled transfer of the same region can be told apart and dropped.
pub type Ticket = u64;

/// Lifecycle of a queue entry.
#[derive(Debug)]
pub enum TransferState {
    /// Waiting for a transfer slot.
    Queued,
    /// Bytes are moving.
    Downloading {
        progress: Progress,
        handle: TransferHandle,
    },
    /// The diff is downloaded and being applied.
    ApplyingDiff { cancel: CancellationToken },
}

/// One pending or in-flight transfer.
#[derive(Debug)]
pub struct TransferRequest {
    pub country_id: CountryId,
    pub kind: FileKind,
    pub target_version: DataVersion,
    /// Local version a diff applies to. `None` for full transfers.
    pub diff_base_version: Option<DataVersion>,
    /// Version directory the file is written into.
    pub destination: PathBuf,
    /// Expected transfer size.
    pub bytes_total: u64,
    pub sha256: Option<String>,
    pub ticket: Ticket,
    pub enqueued_at: Instant,
    state: TransferState,
}

impl TransferRequest {
    /// A full map transfer.
    pub fn full(
        country_id: impl Into<CountryId>,
        target_version: DataVersion,
        destination: PathBuf,
        bytes_total: u64,
    ) -> Self {
        Self {
            country_id: country_id.into(),
            kind: FileKind::Map,
            target_version,
            diff_base_version: None,
            destination,
            bytes_total,
            sha256: None,
            ticket: 0,
            enqueued_at: Instant::now(),
            state: TransferState::Queued,
        }
    }

    /// A diff transfer from `base_version`.
    pub fn diff(
        country_id: impl Into<CountryId>,
        base_version: DataVersion,
        target_version: DataVersion,
        destination: PathBuf,
        bytes_total: u64,
    ) -> Self {
        Self {
            kind: FileKind::Diff,
            diff_base_version: Some(base_version),
            ..Self::full(country_id, target_version, destination, bytes_total)
        }
    }

    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256;
        self
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn is_diff(&self) -> bool {
        self.kind == FileKind::Diff
    }

    /// True once the entry left the waiting state.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, TransferState::Queued)
    }

    /// Downloaded bytes so far against the expected total.
    pub fn progress(&self) -> Progress {
        match &self.state {
            TransferState::Queued => Progress::new(0, self.bytes_total),
            TransferState::Downloading { progress, .. } => *progress,
            TransferState::ApplyingDiff { .. } => Progress::complete(self.bytes_total),
        }
    }

    pub fn start_download(&mut self, handle: TransferHandle) {
        self.state = TransferState::Downloading {
            progress: Progress::new(0, self.bytes_total),
            handle,
        };
    }

    pub fn start_applying(&mut self, cancel: CancellationToken) {
        self.state = TransferState::ApplyingDiff { cancel };
    }

    /// Records reported progress, never moving backwards.
    ///
    /// Returns the stored value, or `None` if the entry is not downloading.
    pub fn update_progress(&mut self, reported: Progress) -> Option<Progress> {
        let TransferState::Downloading { progress, .. } = &mut self.state else {
            return None;
        };
        if reported.bytes_total > 0 {
            progress.bytes_total = reported.bytes_total;
        }
        progress.bytes_downloaded = progress.bytes_downloaded.max(reported.bytes_downloaded);
        progress.bytes_total = progress.bytes_total.max(progress.bytes_downloaded);
        Some(*progress)
    }

    /// Turns a waiting diff transfer into a full transfer.
    pub fn convert_to_full(&mut self, bytes_total: u64) {
        self.kind = FileKind::Map;
        self.diff_base_version = None;
        self.bytes_total = bytes_total;
    }

    /// Asks whatever is running for this entry to stop.
    pub fn cancel(&self) {
        match &self.state {
            TransferState::Queued => {}
            TransferState::Downloading { handle, .. } => handle.cancel(),
            TransferState::ApplyingDiff { cancel } => cancel.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_decreases() {
        let mut req = TransferRequest::full("Luna", 1, PathBuf::from("/d/1"), 100);
        assert_eq!(req.update_progress(Progress::new(10, 100)), None);

        req.start_download(TransferHandle::new(CancellationToken::new()));
        assert_eq!(req.update_progress(Progress::new(40, 100)), Some(Progress::new(40, 100)));
        assert_eq!(req.update_progress(Progress::new(20, 100)), Some(Progress::new(40, 100)));
        assert_eq!(req.update_progress(Progress::new(100, 100)), Some(Progress::new(100, 100)));
    }

    #[test]
    fn test_unknown_total_keeps_expected_size() {
        let mut req = TransferRequest::full("Luna", 1, PathBuf::from("/d/1"), 100);
        req.start_download(TransferHandle::new(CancellationToken::new()));
        assert_eq!(req.update_progress(Progress::new(30, 0)), Some(Progress::new(30, 100)));
    }

    #[test]
    fn test_cancel_reaches_handle() {
        let token = CancellationToken::new();
        let mut req = TransferRequest::full("Luna", 1, PathBuf::from("/d/1"), 100);
        req.start_download(TransferHandle::new(token.clone()));
        req.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_convert_diff_to_full() {
        let mut req = TransferRequest::diff("Luna", 1, 2, PathBuf::from("/d/2"), 10);
        assert!(req.is_diff());
        req.convert_to_full(100);
        assert!(!req.is_diff());
        assert_eq!(req.diff_base_version, None);
        assert_eq!(req.progress(), Progress::new(0, 100));
    }
}
