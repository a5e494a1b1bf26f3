//! Observer lists with snapshot-on-notify semantics
//!
//! Callbacks are invoked over a snapshot of the list, so a callback may add or
//! remove observers (including itself) while a notification is in flight.
//! A callback that errors or panics is logged and skipped; the rest still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

pub type Callback<T> = Arc<dyn Fn(&T) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

pub struct Observers<T: ?Sized> {
    entries: Vec<(ObserverId, Callback<T>)>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ObserverId, callback: Callback<T>) {
        self.entries.push((id, callback));
    }

    /// Remove one observer; returns whether it was present
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Callbacks in registration order
    pub fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Monotonic id source for observers
#[derive(Debug, Default)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    pub fn next_id(&mut self) -> ObserverId {
        self.next += 1;
        ObserverId(self.next)
    }
}

/// Outcome of one notification round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub faults: usize,
}

/// Invoke every callback in `snapshot` with `value`, isolating faults
pub fn notify_all<T: ?Sized>(topic: &str, snapshot: &[Callback<T>], value: &T) -> Delivery {
    let mut delivery = Delivery::default();
    for callback in snapshot {
        match catch_unwind(AssertUnwindSafe(|| callback(value))) {
            Ok(Ok(())) => delivery.delivered += 1,
            Ok(Err(e)) => {
                delivery.faults += 1;
                warn!(topic = %topic, error = %e, "Subscriber callback failed");
            }
            Err(_) => {
                delivery.faults += 1;
                warn!(topic = %topic, "Subscriber callback panicked");
            }
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cb<F>(f: F) -> Callback<u32>
    where
        F: Fn(&u32) -> HandlerResult + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[test]
    fn test_add_remove() {
        let mut ids = IdGen::default();
        let mut observers: Observers<u32> = Observers::new();
        let a = ids.next_id();
        let b = ids.next_id();
        observers.add(a, cb(|_| Ok(())));
        observers.add(b, cb(|_| Ok(())));
        assert_eq!(observers.len(), 2);

        assert!(observers.remove(a));
        assert!(!observers.remove(a));
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_faults_are_isolated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);

        let snapshot = vec![
            cb(move |_| {
                h1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            cb(|_| Err("boom".into())),
            cb(|_| panic!("subscriber bug")),
            cb(move |_| {
                h2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];

        let delivery = notify_all("test", &snapshot, &7);
        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.faults, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
