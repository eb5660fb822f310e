//! Byte transport collaborator.
//!
//! The storage never moves bytes itself. It hands a [`TransferJob`] to a
//! [`Transport`] and gets progress and a final [`TransferOutcome`] back
//! through the job's [`TransferReporter`], which posts them to the storage
//! actor. Reporters may be used from any thread.
//!
//! # Contract
//!
//! - The transport writes partial data to `{destination}.downloading` and
//!   renames it to `destination` only after the whole file is present and
//!   verified.
//! - `TransferHandle::cancel` is a request: the transport stops at its next
//!   checkpoint and reports [`TransferFailure::Cancelled`] (or nothing).
//! - Every started job reports exactly one outcome unless it was cancelled.

mod checksum;
mod http;

pub use checksum::{calculate_file_checksum, verify_checksum, ChecksumError};
pub use http::{HttpTransport, DEFAULT_TIMEOUT_SECS};

use std::fmt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::country::{CountryId, NodeErrorCode, Progress};
use crate::local::FileKind;
use crate::queue::{Completion, CompletionSender, Ticket};

/// Everything a transport needs to fetch one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub country_id: CountryId,
    pub kind: FileKind,
    /// Mirror URLs, tried in order.
    pub urls: Vec<String>,
    /// Final path of the finished download (the `.ready` file).
    pub destination: PathBuf,
    pub expected_size: u64,
    pub sha256: Option<String>,
}

/// Why a transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    /// Connection or HTTP error.
    Network(String),
    /// The server does not have the file.
    FileNotFound,
    /// The disk filled up while writing.
    OutOfDiskSpace,
    /// The downloaded bytes do not match the expected checksum.
    IntegrityMismatch { expected: String, actual: String },
    /// Local I/O failure other than a full disk.
    Io(String),
    /// Stopped by [`TransferHandle::cancel`].
    Cancelled,
}

impl TransferFailure {
    /// Error code shown on the failed leaf.
    pub fn error_code(&self) -> NodeErrorCode {
        match self {
            TransferFailure::Network(_) | TransferFailure::FileNotFound => NodeErrorCode::Network,
            TransferFailure::OutOfDiskSpace => NodeErrorCode::OutOfDiskSpace,
            TransferFailure::IntegrityMismatch { .. }
            | TransferFailure::Io(_)
            | TransferFailure::Cancelled => NodeErrorCode::Unknown,
        }
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFailure::Network(reason) => write!(f, "network error: {}", reason),
            TransferFailure::FileNotFound => write!(f, "file not found on server"),
            TransferFailure::OutOfDiskSpace => write!(f, "out of disk space"),
            TransferFailure::IntegrityMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {}, got {}", expected, actual)
            }
            TransferFailure::Io(reason) => write!(f, "I/O error: {}", reason),
            TransferFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Failed(TransferFailure),
}

/// Cancellation handle for a running transfer.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    cancel: CancellationToken,
}

impl TransferHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Posts transfer events back to the storage actor.
#[derive(Debug, Clone)]
pub struct TransferReporter {
    country_id: CountryId,
    ticket: Ticket,
    tx: CompletionSender,
}

impl TransferReporter {
    pub(crate) fn new(country_id: CountryId, ticket: Ticket, tx: CompletionSender) -> Self {
        Self {
            country_id,
            ticket,
            tx,
        }
    }

    pub fn country_id(&self) -> &str {
        &self.country_id
    }

    pub fn progress(&self, bytes_downloaded: u64, bytes_total: u64) {
        let _ = self.tx.send(Completion::TransferProgress {
            country_id: self.country_id.clone(),
            ticket: self.ticket,
            progress: Progress::new(bytes_downloaded, bytes_total),
        });
    }

    pub fn finish(self, outcome: TransferOutcome) {
        let _ = self.tx.send(Completion::TransferFinished {
            country_id: self.country_id,
            ticket: self.ticket,
            outcome,
        });
    }
}

/// Starts transfers. Must return without waiting for the transfer.
pub trait Transport: Send + Sync {
    fn start(&self, job: TransferJob, reporter: TransferReporter) -> TransferHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_error_codes() {
        assert_eq!(
            TransferFailure::Network("reset".into()).error_code(),
            NodeErrorCode::Network
        );
        assert_eq!(TransferFailure::FileNotFound.error_code(), NodeErrorCode::Network);
        assert_eq!(
            TransferFailure::OutOfDiskSpace.error_code(),
            NodeErrorCode::OutOfDiskSpace
        );
        assert_eq!(
            TransferFailure::Io("denied".into()).error_code(),
            NodeErrorCode::Unknown
        );
    }

    #[test]
    fn test_reporter_posts_completions() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = TransferReporter::new("Luna".into(), 7, tx);
        reporter.progress(5, 10);
        reporter.finish(TransferOutcome::Completed);

        match rx.try_recv().unwrap() {
            Completion::TransferProgress { progress, ticket, .. } => {
                assert_eq!(progress, Progress::new(5, 10));
                assert_eq!(ticket, 7);
            }
            other => panic!("unexpected completion: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Completion::TransferFinished { outcome, .. } => {
                assert_eq!(outcome, TransferOutcome::Completed)
            }
            other => panic!("unexpected completion: {:?}", other),
        }
    }
}
