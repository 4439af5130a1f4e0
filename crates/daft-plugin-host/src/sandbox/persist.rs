//! Debounced, single-slot persistence.
//!
//! The first mutation after idle opens a pending slot and arms a timer.
//! Later mutations reuse the slot and re-arm the timer. When the timer
//! finally fires, one write of the full state runs and its outcome is
//! published to every ticket handed out for that slot.

use crate::error::{PluginHostError, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of one durable write, shared by every waiter of its slot.
type PersistOutcome = std::result::Result<(), String>;

/// Performs one full write when the debounce timer fires.
pub(crate) type WriteFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Awaitable outcome of a debounced write.
#[derive(Debug, Clone)]
pub struct PersistTicket {
    rx: watch::Receiver<Option<PersistOutcome>>,
}

impl PersistTicket {
    /// Wait for the write this ticket belongs to.
    ///
    /// Fails with [`PluginHostError::Storage`] if the write failed or was
    /// abandoned before it ran.
    pub async fn wait(mut self) -> Result<()> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(PluginHostError::Storage { message }),
            None => Err(PluginHostError::Storage {
                message: "persistence abandoned before the write ran".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct Slot {
    /// Bumped on every schedule; a timer only fires for the latest one.
    generation: u64,
    pending: Option<watch::Sender<Option<PersistOutcome>>>,
    in_flight: Option<watch::Receiver<Option<PersistOutcome>>>,
    timer: Option<JoinHandle<()>>,
}

/// Coalesces bursts of mutations into one trailing write.
pub(crate) struct DebouncedWriter {
    delay: Duration,
    write: WriteFn,
    slot: Arc<Mutex<Slot>>,
}

impl DebouncedWriter {
    pub(crate) fn new(delay: Duration, write: WriteFn) -> Self {
        Self {
            delay,
            write,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Record a mutation: open or reuse the pending slot and restart the
    /// timer. Must be called from within a tokio runtime.
    pub(crate) fn schedule(&self) -> PersistTicket {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        let generation = slot.generation;

        let rx = match slot.pending {
            Some(ref tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(None);
                slot.pending = Some(tx);
                rx
            }
        };

        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let slot_ref = Arc::clone(&self.slot);
        let write = Arc::clone(&self.write);
        let delay = self.delay;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let tx = {
                let mut slot = lock(&slot_ref);
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                let tx = slot.pending.take();
                slot.in_flight = tx.as_ref().map(watch::Sender::subscribe);
                tx
            };
            let Some(tx) = tx else {
                return;
            };

            let outcome = write().await.map_err(|e| e.to_string());
            match outcome {
                Ok(()) => debug!("Debounced write completed"),
                Err(ref message) => warn!("Debounced write failed: {}", message),
            }
            tx.send_replace(Some(outcome));

            let mut slot = lock(&slot_ref);
            if slot.generation == generation {
                slot.in_flight = None;
            }
        }));

        PersistTicket { rx }
    }

    /// Ticket for the write that is pending or running, if any.
    pub(crate) fn current(&self) -> Option<PersistTicket> {
        let slot = lock(&self.slot);
        slot.pending
            .as_ref()
            .map(watch::Sender::subscribe)
            .or_else(|| slot.in_flight.clone())
            .map(|rx| PersistTicket { rx })
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
