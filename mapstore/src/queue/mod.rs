//! Ordered download queue.
//!
//! Entries are kept in enqueue order and started front to back. There is at
//! most one entry per region: enqueuing a region that is already queued
//! returns the existing entry unchanged.
//!
//! # Example
//!
//! ```
//! use std::path::PathBuf;
//! use mapstore::queue::{DownloadQueue, TransferRequest};
//!
//! let mut queue = DownloadQueue::new();
//! let (_, inserted) = queue.enqueue(TransferRequest::full("Luna", 1, PathBuf::from("/d/1"), 10));
//! assert!(inserted);
//! let (_, inserted) = queue.enqueue(TransferRequest::full("Luna", 1, PathBuf::from("/d/1"), 10));
//! assert!(!inserted);
//! assert_eq!(queue.len(), 1);
//! ```

mod completion;
mod request;

pub use completion::{Completion, CompletionReceiver, CompletionSender};
pub use request::{Ticket, TransferRequest, TransferState};

use std::collections::VecDeque;

use crate::country::CountryId;

#[derive(Debug, Default)]
pub struct DownloadQueue {
    entries: VecDeque<TransferRequest>,
    next_ticket: Ticket,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request unless one for the same region exists.
    ///
    /// Returns the entry now in the queue and whether it was inserted.
    pub fn enqueue(&mut self, mut request: TransferRequest) -> (&TransferRequest, bool) {
        if let Some(pos) = self.position(&request.country_id) {
            return (&self.entries[pos], false);
        }
        self.next_ticket += 1;
        request.ticket = self.next_ticket;
        self.entries.push_back(request);
        let last = self.entries.len() - 1;
        (&self.entries[last], true)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&TransferRequest> {
        self.entries.iter().find(|r| r.country_id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TransferRequest> {
        self.entries.iter_mut().find(|r| r.country_id == id)
    }

    /// Entry for `id` only if it still carries `ticket`.
    pub fn get_ticketed_mut(&mut self, id: &str, ticket: Ticket) -> Option<&mut TransferRequest> {
        self.get_mut(id).filter(|r| r.ticket == ticket)
    }

    pub fn remove(&mut self, id: &str) -> Option<TransferRequest> {
        let pos = self.position(id)?;
        self.entries.remove(pos)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRequest> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TransferRequest> {
        self.entries.iter_mut()
    }

    /// Region ids in queue order.
    pub fn ids(&self) -> Vec<CountryId> {
        self.entries.iter().map(|r| r.country_id.clone()).collect()
    }

    /// First entry still waiting for a slot.
    pub fn next_waiting(&self) -> Option<&TransferRequest> {
        self.entries.iter().find(|r| !r.is_active())
    }

    /// Number of entries downloading or applying a diff.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|r| r.is_active()).count()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|r| r.country_id == id)
    }
}
