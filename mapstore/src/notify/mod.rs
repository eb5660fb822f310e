//! Observer notifications: event types, sinks and the batching notifier.

mod event;
mod notifier;
mod sink;

pub use event::{StatusChange, StorageEvent, SubscriptionId};
pub use notifier::{BatchScope, Notifier};
pub use sink::{CallbackSink, EventSink};
