//! Caller-registered listener sets.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

/// A registered listener callback.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

type Entries<T> = Vec<(u64, Listener<T>)>;

/// Ordered set of listeners for one event type.
///
/// Dispatch iterates over a snapshot, so a listener may unsubscribe itself
/// (or others) while being called.
pub(crate) struct ListenerSet<T> {
    entries: Arc<Mutex<Entries<T>>>,
    next_id: AtomicU64,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn add(&self, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, listener));

        let entries = Arc::downgrade(&self.entries);
        Subscription {
            remove: Box::new(move || {
                if let Some(entries) = entries.upgrade() {
                    lock(&entries).retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Call every listener registered at the time of the call.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    /// Returns the number of listeners that completed.
    pub(crate) fn dispatch(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = lock(&self.entries)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut completed = 0;
        for listener in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => completed += 1,
                Err(payload) => error!("Listener panicked: {}", panic_message(payload.as_ref())),
            }
        }
        completed
    }

    pub(crate) fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn lock<T>(entries: &Mutex<Entries<T>>) -> MutexGuard<'_, Entries<T>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned when registering a listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    remove: Box<dyn FnOnce() + Send + Sync>,
}

impl Subscription {
    /// Remove the listener. Idempotent with respect to `dispose`.
    pub fn unsubscribe(self) {
        (self.remove)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_and_unsubscribe() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let sub = set.add(Arc::new(move |v: &u32| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        }));

        assert_eq!(set.dispatch(&3), 1);
        sub.unsubscribe();
        assert_eq!(set.dispatch(&3), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next() {
        let set: Arc<ListenerSet<u32>> = Arc::new(ListenerSet::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_set = Arc::clone(&set);
        let inner_calls = Arc::clone(&calls);
        let _sub = set.add(Arc::new(move |_: &u32| {
            let calls = Arc::clone(&inner_calls);
            let _ = inner_set.add(Arc::new(move |_: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(set.dispatch(&0), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_skip_others() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _first = set.add(Arc::new(|_: &u32| panic!("listener bug")));
        let counter = Arc::clone(&seen);
        let _second = set.add(Arc::new(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(set.dispatch(&0), 1);
        assert_eq!(set.dispatch(&0), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_after_clear() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let sub = set.add(Arc::new(|_: &u32| {}));
        set.clear();
        sub.unsubscribe();
        assert_eq!(set.len(), 0);
    }
}
