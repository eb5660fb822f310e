//! Diff application collaborator.
//!
//! Applying a binary diff is format specific and runs outside the storage
//! actor. The storage hands the applier an old map, the downloaded diff and
//! an output path, then waits for a [`DiffApplyResult`] to come back through
//! the [`DiffReporter`].

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::country::CountryId;
use crate::queue::{Completion, CompletionSender, Ticket};

/// Files involved in one diff application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffApplyParams {
    pub country_id: CountryId,
    /// The current local map.
    pub old_map: PathBuf,
    /// The downloaded diff.
    pub diff: PathBuf,
    /// Where the new map must be written. The storage promotes it afterwards.
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffApplyResult {
    Ok,
    Failed(String),
    Cancelled,
}

/// Sends the result of a diff application back to the storage actor.
#[derive(Debug)]
pub struct DiffReporter {
    country_id: CountryId,
    ticket: Ticket,
    tx: CompletionSender,
}

impl DiffReporter {
    pub(crate) fn new(country_id: CountryId, ticket: Ticket, tx: CompletionSender) -> Self {
        Self {
            country_id,
            ticket,
            tx,
        }
    }

    /// Reports the result. Consumes the reporter so it is sent only once.
    pub fn finish(self, result: DiffApplyResult) {
        // The storage may already be gone; nothing to report to then.
        let _ = self.tx.send(Completion::DiffApplied {
            country_id: self.country_id,
            ticket: self.ticket,
            result,
        });
    }
}

/// Applies downloaded diffs.
///
/// Implementations must not block the caller; run the work on another
/// thread and call [`DiffReporter::finish`] when done. Cancellation is
/// cooperative through the token.
pub trait DiffApplier: Send + Sync {
    fn start(&self, params: DiffApplyParams, reporter: DiffReporter, cancel: CancellationToken);
}
