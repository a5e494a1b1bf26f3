//! Channel subscription registry
//!
//! Maps channel name to an ordered list of callbacks. Registrations are
//! reference counted per channel: the caller learns when the first callback
//! arrives and when the last one leaves, which is when the wire-level
//! `subscribe` / `unsubscribe` envelopes are due.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use crate::observer::{notify_all, Callback, Delivery, IdGen, ObserverId, Observers};

#[derive(Default)]
struct RouterState {
    channels: HashMap<String, Observers<Value>>,
    ids: IdGen,
}

#[derive(Clone, Default)]
pub struct MessageRouter {
    state: Arc<Mutex<RouterState>>,
}

/// Result of adding a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: ObserverId,
    /// First callback on this channel; a wire subscribe is due
    pub first: bool,
}

/// Result of removing a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    Removed,
    /// Last callback on this channel left; a wire unsubscribe is due
    LastRemoved,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, channel: &str, callback: Callback<Value>) -> Registration {
        let mut state = self.state();
        let id = state.ids.next_id();
        let observers = state.channels.entry(channel.to_string()).or_default();
        let first = observers.is_empty();
        observers.add(id, callback);
        Registration { id, first }
    }

    pub fn unregister(&self, channel: &str, id: ObserverId) -> Removal {
        let mut state = self.state();
        let Some(observers) = state.channels.get_mut(channel) else {
            return Removal::NotFound;
        };
        if !observers.remove(id) {
            return Removal::NotFound;
        }
        if observers.is_empty() {
            state.channels.remove(channel);
            Removal::LastRemoved
        } else {
            Removal::Removed
        }
    }

    /// Deliver `data` to every callback on `channel`, in registration order.
    ///
    /// The lock is released before any callback runs.
    pub fn dispatch(&self, channel: &str, data: &Value) -> Delivery {
        let snapshot = match self.state().channels.get(channel) {
            Some(observers) => observers.snapshot(),
            None => {
                trace!(channel = %channel, "No subscribers for channel");
                return Delivery::default();
            }
        };
        notify_all(channel, &snapshot, data)
    }

    /// Channels with at least one live callback, sorted
    pub fn channels(&self) -> BTreeSet<String> {
        self.state().channels.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map(Observers::len)
            .unwrap_or(0)
    }
}
