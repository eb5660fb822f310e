//! Messages sent back to the storage actor by off-thread collaborators.

use tokio::sync::mpsc;

use super::request::Ticket;
use crate::country::{CountryId, Progress};
use crate::diff::DiffApplyResult;
use crate::transport::TransferOutcome;

/// Progress or result of work running outside the storage actor.
#[derive(Debug)]
pub enum Completion {
    TransferProgress {
        country_id: CountryId,
        ticket: Ticket,
        progress: Progress,
    },
    TransferFinished {
        country_id: CountryId,
        ticket: Ticket,
        outcome: TransferOutcome,
    },
    DiffApplied {
        country_id: CountryId,
        ticket: Ticket,
        result: DiffApplyResult,
    },
}

impl Completion {
    pub fn country_id(&self) -> &str {
        match self {
            Completion::TransferProgress { country_id, .. }
            | Completion::TransferFinished { country_id, .. }
            | Completion::DiffApplied { country_id, .. } => country_id,
        }
    }

    pub fn ticket(&self) -> Ticket {
        match self {
            Completion::TransferProgress { ticket, .. }
            | Completion::TransferFinished { ticket, .. }
            | Completion::DiffApplied { ticket, .. } => *ticket,
        }
    }
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;
