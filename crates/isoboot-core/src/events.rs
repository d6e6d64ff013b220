//! Cross-thread event bus
//!
//! Producers (the pipeline worker and the recovery thread) publish [`Event`]s;
//! each subscriber owns a bounded queue and drains it on its own thread.
//! Delivery is FIFO per producer. When a subscriber's queue is full,
//! intermediate [`Event::Progress`] updates are dropped for that subscriber
//! while every other event blocks until there is room. A subscriber that has
//! been dropped is pruned on the next publish.

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

use crate::error::ErrorCategory;
use crate::types::{ProgressEvent, Stage};

/// Default per-subscriber queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Notifications emitted while provisioning
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pipeline stage began
    StageStarted { stage: Stage },

    /// Free-text progress narration
    Log { message: String },

    /// Byte-level copy progress
    Progress(ProgressEvent),

    /// A failure that ended the current run
    Error {
        message: String,
        category: ErrorCategory,
    },

    /// The pipeline run finished
    Completed { success: bool, message: String },

    /// Whether the user may start another operation
    ControlsEnabled { enabled: bool },

    /// Provisioning succeeded and a reboot will start the new entry
    RestartSuggested,

    /// Space recovery finished
    RecoveryCompleted { success: bool, message: String },
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Event::Log {
            message: message.into(),
        }
    }

    pub fn progress(bytes_copied: u64, bytes_total: u64, operation: impl Into<String>) -> Self {
        Event::Progress(ProgressEvent {
            bytes_copied,
            bytes_total,
            operation: operation.into(),
        })
    }

    fn is_coalescable(&self) -> bool {
        matches!(self, Event::Progress(p) if !p.is_clear())
    }
}

/// Handle used by producers; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(u64, SyncSender<Event>)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber with its own bounded queue
    pub fn subscribe(&self, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, tx));
        Subscription { rx }
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: Event) {
        // Snapshot the senders so a full queue never blocks other publishers on the lock
        let senders: Vec<(u64, SyncSender<Event>)> = self.lock().clone();
        let mut disconnected = Vec::new();

        for (id, tx) in &senders {
            let delivered = if event.is_coalescable() {
                match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        trace!("Dropping progress update for a saturated subscriber");
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                }
            } else {
                tx.send(event.clone()).is_ok()
            };
            if !delivered {
                disconnected.push(*id);
            }
        }

        if !disconnected.is_empty() {
            self.lock().retain(|(id, _)| !disconnected.contains(id));
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.publish(Event::log(message));
    }

    pub fn progress(&self, bytes_copied: u64, bytes_total: u64, operation: &str) {
        self.publish(Event::progress(bytes_copied, bytes_total, operation));
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, SyncSender<Event>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end owned by one consumer
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<Event>,
}

impl Subscription {
    /// Block until the next event; `None` once every producer handle is gone
    pub fn recv(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain whatever is queued right now
    pub fn drain(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
