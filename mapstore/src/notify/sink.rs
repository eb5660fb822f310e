//! Observer endpoints.

use tokio::sync::mpsc;

use super::event::{StatusChange, StorageEvent};
use crate::country::Progress;

/// Receives storage events.
///
/// Returning `false` means the observer is gone and it is unsubscribed.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: StorageEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<StorageEvent> {
    fn deliver(&self, event: StorageEvent) -> bool {
        self.send(event).is_ok()
    }
}

type StatusFn = Box<dyn Fn(&[StatusChange]) + Send + Sync>;
type ProgressFn = Box<dyn Fn(&str, Progress) + Send + Sync>;
type RegionFn = Box<dyn Fn(&str) + Send + Sync>;

/// Callback based observer for adapter layers.
pub struct CallbackSink {
    on_status: StatusFn,
    on_progress: ProgressFn,
    on_current_region: Option<RegionFn>,
}

impl CallbackSink {
    pub fn new<S, P>(on_status: S, on_progress: P) -> Self
    where
        S: Fn(&[StatusChange]) + Send + Sync + 'static,
        P: Fn(&str, Progress) + Send + Sync + 'static,
    {
        Self {
            on_status: Box::new(on_status),
            on_progress: Box::new(on_progress),
            on_current_region: None,
        }
    }

    pub fn with_current_region<R>(mut self, on_current_region: R) -> Self
    where
        R: Fn(&str) + Send + Sync + 'static,
    {
        self.on_current_region = Some(Box::new(on_current_region));
        self
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("on_current_region", &self.on_current_region.is_some())
            .finish_non_exhaustive()
    }
}

impl EventSink for CallbackSink {
    fn deliver(&self, event: StorageEvent) -> bool {
        match event {
            StorageEvent::StatusChanged(changes) => (self.on_status)(&changes),
            StorageEvent::ProgressChanged {
                country_id,
                progress,
            } => (self.on_progress)(&country_id, progress),
            StorageEvent::CurrentRegionChanged(country_id) => {
                if let Some(cb) = &self.on_current_region {
                    cb(&country_id);
                }
            }
        }
        true
    }
}
