//! Subscriber registry and status batching.
//!
//! A storage operation touching many leaves opens a batching scope with
//! [`Notifier::start_batching`]. Status changes recorded while the scope is
//! open are buffered per subscriber and delivered as a single
//! [`StorageEvent::StatusChanged`] when the outermost scope is dropped. A
//! leaf changed twice within a scope keeps its first position and its last
//! status.
//! Without an open scope a status change is delivered at once as a batch of
//! one.
//!
//! ```text
//! download_node("Europe")
//!   ├─ start_batching()          depth 0 → 1
//!   ├─ status_changed("Cyprus")  buffered
//!   ├─ status_changed("Malta")   buffered
//!   └─ scope dropped             depth 1 → 0, one StatusChanged([Cyprus, Malta]) per subscriber
//! ```
//!
//! The registry sits behind a mutex so subscriptions can change from any
//! thread. Sinks are always invoked after the lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::event::{StatusChange, StorageEvent, SubscriptionId};
use super::sink::EventSink;
use crate::country::{CountryId, Progress};

#[derive(Default)]
struct NotifierState {
    subscribers: BTreeMap<SubscriptionId, Arc<dyn EventSink>>,
    next_id: SubscriptionId,
    batch_depth: usize,
    pending: BTreeMap<SubscriptionId, Vec<StatusChange>>,
}

/// Shared handle to the subscriber registry and batch buffer.
#[derive(Clone, Default)]
pub struct Notifier {
    state: Arc<Mutex<NotifierState>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Notifier")
            .field("subscribers", &state.subscribers.len())
            .field("batch_depth", &state.batch_depth)
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(id, sink);
        debug!(subscription = id, "Observer subscribed");
        id
    }

    /// Subscribes a fresh channel and returns its receiving end.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StorageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(Arc::new(tx)), rx)
    }

    /// Removes a subscription. Unknown ids are ignored and return `false`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        state.pending.remove(&id);
        let removed = state.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Observer unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Opens a batching scope. Nested scopes join the outermost one.
    pub fn start_batching(&self) -> BatchScope {
        self.state.lock().batch_depth += 1;
        BatchScope {
            notifier: self.clone(),
        }
    }

    pub fn is_batching(&self) -> bool {
        self.state.lock().batch_depth > 0
    }

    /// Records a leaf status change.
    pub fn status_changed(&self, change: StatusChange) {
        let targets = {
            let mut state = self.state.lock();
            if state.subscribers.is_empty() {
                return;
            }
            if state.batch_depth > 0 {
                let ids: Vec<SubscriptionId> = state.subscribers.keys().copied().collect();
                for id in ids {
                    let pending = state.pending.entry(id).or_default();
                    match pending
                        .iter()
                        .position(|c| c.country_id == change.country_id)
                    {
                        Some(i) => pending[i] = change.clone(),
                        None => pending.push(change.clone()),
                    }
                }
                trace!(country_id = %change.country_id, status = %change.status, "Status change buffered");
                return;
            }
            snapshot(&state)
        };
        let event = StorageEvent::StatusChanged(vec![change]);
        self.deliver_all(targets, event);
    }

    /// Delivers progress immediately. Progress is never batched.
    pub fn progress_changed(&self, country_id: &str, progress: Progress) {
        let targets = snapshot(&self.state.lock());
        if targets.is_empty() {
            return;
        }
        let event = StorageEvent::ProgressChanged {
            country_id: country_id.to_string(),
            progress,
        };
        self.deliver_all(targets, event);
    }

    pub fn current_region_changed(&self, country_id: CountryId) {
        let targets = snapshot(&self.state.lock());
        self.deliver_all(targets, StorageEvent::CurrentRegionChanged(country_id));
    }

    fn end_batch(&self) {
        let batches: Vec<(SubscriptionId, Arc<dyn EventSink>, Vec<StatusChange>)> = {
            let mut state = self.state.lock();
            state.batch_depth = state.batch_depth.saturating_sub(1);
            if state.batch_depth > 0 {
                return;
            }
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .filter(|(_, changes)| !changes.is_empty())
                .filter_map(|(id, changes)| {
                    state
                        .subscribers
                        .get(&id)
                        .map(|sink| (id, Arc::clone(sink), changes))
                })
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sink, changes) in batches {
            debug!(subscription = id, changes = changes.len(), "Flushing status batch");
            if !sink.deliver(StorageEvent::StatusChanged(changes)) {
                dead.push(id);
            }
        }
        self.drop_dead(dead);
    }

    fn deliver_all(&self, targets: Vec<(SubscriptionId, Arc<dyn EventSink>)>, event: StorageEvent) {
        let mut dead = Vec::new();
        for (id, sink) in targets {
            if !sink.deliver(event.clone()) {
                dead.push(id);
            }
        }
        self.drop_dead(dead);
    }

    fn drop_dead(&self, dead: Vec<SubscriptionId>) {
        if dead.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for id in dead {
            state.subscribers.remove(&id);
            state.pending.remove(&id);
            debug!(subscription = id, "Observer gone, unsubscribed");
        }
    }
}

fn snapshot(state: &NotifierState) -> Vec<(SubscriptionId, Arc<dyn EventSink>)> {
    state
        .subscribers
        .iter()
        .map(|(id, sink)| (*id, Arc::clone(sink)))
        .collect()
}

/// Open batching scope. Dropping it ends the scope.
#[must_use = "the batch is flushed as soon as the scope is dropped"]
pub struct BatchScope {
    notifier: Notifier,
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope").finish_non_exhaustive()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        self.notifier.end_batch();
    }
}
