//! Async waits over the connection's event stream.
//!
//! A [`WaitSet`] bridges event-driven delivery into single-resolution
//! futures: each wait is one registry entry holding either a message
//! predicate or a lifecycle event kind plus a oneshot completion.
//! Registration happens synchronously when the wait is created (so a
//! reply cannot slip past between send and await), and every entry is
//! removed exactly once: on resolution, rejection, timeout, or drop of
//! the wait handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;

use scrivo_protocol::Envelope;

use crate::types::EventKind;

/// Why a wait did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The connection closed before the wait resolved.
    #[error("connection closed")]
    ConnectionClosed,

    /// No matching delivery within the caller's window.
    #[error("wait timed out")]
    TimedOut,
}

type Predicate = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

enum Entry {
    Message {
        predicate: Predicate,
        tx: oneshot::Sender<Envelope>,
    },
    Event {
        kind: EventKind,
        tx: oneshot::Sender<()>,
    },
}

/// Registry of outstanding waits, owned by the connection.
///
/// Entry ids increase monotonically, so iterating the map visits
/// entries in registration order.
#[derive(Default)]
pub(crate) struct WaitSet {
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl WaitSet {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of outstanding registrations. Zero after close.
    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    fn register(self: &Arc<Self>, entry: Entry) -> Option<WaitGuard> {
        if self.closed.load(Ordering::Acquire) {
            // Dropping the entry (and its sender) rejects the wait
            // immediately instead of letting it hang forever.
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(id, entry);
        Some(WaitGuard {
            set: Arc::downgrade(self),
            id,
        })
    }

    /// Registers a wait for the first envelope matching `predicate`.
    ///
    /// Predicates run on the read path and must be cheap; they must not
    /// call back into the connection.
    pub(crate) fn wait_message<P>(
        self: &Arc<Self>,
        predicate: P,
        timeout: Option<Duration>,
    ) -> MessageWait
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let guard = self.register(Entry::Message {
            predicate: Box::new(predicate),
            tx,
        });
        MessageWait { rx, guard, timeout }
    }

    /// Registers a wait for the next lifecycle event of `kind`.
    pub(crate) fn wait_event(
        self: &Arc<Self>,
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> EventWait {
        let (tx, rx) = oneshot::channel();
        let guard = self.register(Entry::Event { kind, tx });
        EventWait { rx, guard, timeout }
    }

    /// Resolves every message wait whose predicate matches `envelope`.
    ///
    /// Matching entries are removed before completion, so a second
    /// matching envelope never reaches the same wait.
    pub(crate) fn deliver_message(&self, envelope: &Envelope) {
        let mut entries = self.entries();
        let matched: Vec<u64> = entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Message { predicate, .. } if predicate(envelope) => Some(*id),
                _ => None,
            })
            .collect();
        for id in matched {
            if let Some(Entry::Message { tx, .. }) = entries.remove(&id) {
                let _ = tx.send(envelope.clone());
            }
        }
    }

    /// Resolves every event wait registered for `kind`.
    pub(crate) fn deliver_event(&self, kind: EventKind) {
        let mut entries = self.entries();
        let matched: Vec<u64> = entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Event { kind: k, .. } if *k == kind => Some(*id),
                _ => None,
            })
            .collect();
        for id in matched {
            if let Some(Entry::Event { tx, .. }) = entries.remove(&id) {
                let _ = tx.send(());
            }
        }
    }

    /// Rejects every outstanding wait and refuses new registrations.
    ///
    /// Called when the connection closes. Dropping the senders makes
    /// the receivers resolve to `ConnectionClosed`.
    pub(crate) fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries().clear();
    }
}

/// Removes the registration when the wait settles or is abandoned.
struct WaitGuard {
    set: Weak<WaitSet>,
    id: u64,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.entries().remove(&self.id);
        }
    }
}

/// A pending message wait. Created with the registration already in
/// place; call [`MessageWait::wait`] to suspend until resolution.
pub struct MessageWait {
    rx: oneshot::Receiver<Envelope>,
    guard: Option<WaitGuard>,
    timeout: Option<Duration>,
}

impl MessageWait {
    /// Suspends until a matching envelope arrives, the connection
    /// closes, or the timeout elapses. The registration is removed on
    /// every exit path.
    pub async fn wait(self) -> Result<Envelope, WaitError> {
        let MessageWait { rx, guard, timeout } = self;
        let result = match timeout {
            Some(window) => match tokio::time::timeout(window, rx).await {
                Ok(received) => received.map_err(|_| WaitError::ConnectionClosed),
                Err(_) => Err(WaitError::TimedOut),
            },
            None => rx.await.map_err(|_| WaitError::ConnectionClosed),
        };
        drop(guard);
        result
    }
}

/// A pending lifecycle-event wait.
pub struct EventWait {
    rx: oneshot::Receiver<()>,
    guard: Option<WaitGuard>,
    timeout: Option<Duration>,
}

impl EventWait {
    /// Suspends until the event fires, the connection closes, or the
    /// timeout elapses.
    pub async fn wait(self) -> Result<(), WaitError> {
        let EventWait { rx, guard, timeout } = self;
        let result = match timeout {
            Some(window) => match tokio::time::timeout(window, rx).await {
                Ok(received) => received.map_err(|_| WaitError::ConnectionClosed),
                Err(_) => Err(WaitError::TimedOut),
            },
            None => rx.await.map_err(|_| WaitError::ConnectionClosed),
        };
        drop(guard);
        result
    }
}
