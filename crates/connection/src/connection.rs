//! The connection: transport ownership, lifecycle, and event fan-out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use scrivo_protocol::{Codec, Envelope, WirePayload};

use crate::target::{ConnectTarget, TargetError};
use crate::types::{ConnectOptions, ConnectionEvent, ConnectionState, EventKind, ListenerId};
use crate::waiter::{EventWait, MessageWait, WaitSet};

/// Errors from the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection already open")]
    AlreadyOpen,

    #[error("connection closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] scrivo_protocol::CodecError),

    #[error(transparent)]
    Target(#[from] TargetError),
}

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// State shared between the connection handle and its pump tasks.
pub(crate) struct Shared {
    state: watch::Sender<ConnectionState>,
    pub(crate) waiters: Arc<WaitSet>,
    listeners: Mutex<BTreeMap<u64, (EventKind, Listener)>>,
    next_listener_id: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Arc::new(Self {
            state,
            waiters: WaitSet::new(),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves the state to `Open` unless the connection already closed.
    ///
    /// A pump can observe transport death and finalize the close while
    /// `open` is still running; `Closed` is terminal and must never be
    /// overwritten.
    pub(crate) fn set_open(&self) -> bool {
        let mut opened = false;
        self.state.send_modify(|s| {
            if *s != ConnectionState::Closed {
                *s = ConnectionState::Open;
                opened = true;
            }
        });
        opened
    }

    pub(crate) fn begin_closing(&self) {
        self.state.send_modify(|s| {
            if *s != ConnectionState::Closed {
                *s = ConnectionState::Closing;
            }
        });
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<u64, (EventKind, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners().insert(id, (kind, listener));
        ListenerId(id)
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) {
        self.listeners().remove(&id.0);
    }

    /// Calls every listener registered for this event's kind, in
    /// registration order. Listeners run outside the registry lock so
    /// they may subscribe or unsubscribe freely.
    pub(crate) fn notify(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .listeners()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in matching {
            listener(event);
        }
    }

    /// Routes a decoded inbound envelope to waiters, then subscribers.
    pub(crate) fn dispatch_message(&self, envelope: Envelope) {
        self.waiters.deliver_message(&envelope);
        self.notify(&ConnectionEvent::Message(envelope));
    }

    /// Surfaces a read or decode failure without closing the connection.
    pub(crate) fn dispatch_error(&self, detail: String) {
        self.waiters.deliver_event(EventKind::Error);
        self.notify(&ConnectionEvent::Error(detail));
    }

    pub(crate) fn dispatch_open(&self) {
        self.waiters.deliver_event(EventKind::Open);
        self.notify(&ConnectionEvent::Opened);
    }

    /// Finalizes the transition to `Closed`. Idempotent: the first
    /// caller (local close or a pump noticing transport loss) wins.
    ///
    /// Waits registered for the `Close` event resolve; every other
    /// outstanding wait is rejected with `ConnectionClosed`.
    pub(crate) fn finish_closed(&self) {
        let mut already_closed = false;
        self.state.send_modify(|s| {
            if *s == ConnectionState::Closed {
                already_closed = true;
            } else {
                *s = ConnectionState::Closed;
            }
        });
        if already_closed {
            return;
        }
        self.waiters.deliver_event(EventKind::Close);
        self.waiters.close_all();
        self.notify(&ConnectionEvent::Closed);
    }
}

/// Running transport resources, released on close.
struct Transport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    read_handle: tokio::task::JoinHandle<()>,
    write_handle: tokio::task::JoinHandle<()>,
    ping_handle: tokio::task::JoinHandle<()>,
}

impl Transport {
    fn shut_down(&self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.ping_handle.abort();
    }
}

/// One persistent, bidirectional, message-oriented channel to the job
/// service.
///
/// Exactly one `Connection` exists per logical endpoint. The codec is
/// fixed at construction and decides the frame kind for both
/// directions. Dropping the connection aborts its pump tasks.
pub struct Connection<C: Codec> {
    codec: Arc<C>,
    options: ConnectOptions,
    shared: Arc<Shared>,
    transport: Mutex<Option<Transport>>,
}

impl<C: Codec> Connection<C> {
    /// Creates a connection in the `Connecting` state. Nothing can be
    /// sent until [`Connection::open`] succeeds.
    pub fn new(codec: C, options: ConnectOptions) -> Self {
        Self {
            codec: Arc::new(codec),
            options,
            shared: Shared::new(),
            transport: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// The codec governing this connection's wire.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Number of outstanding waits. Zero once the connection closes.
    pub fn pending_waits(&self) -> usize {
        self.shared.waiters.len()
    }

    fn transport(&self) -> MutexGuard<'_, Option<Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Establishes the transport and spawns the pump tasks.
    ///
    /// The target resolver is invoked once per attempt. A connection is
    /// good for one attempt: on failure the state moves to `Closed` and
    /// the handle cannot be opened again. Retry loops construct a fresh
    /// connection per attempt (see [`crate::types::ReconnectConfig`]).
    pub async fn open(&self, target: &ConnectTarget) -> Result<(), ConnectionError> {
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        if self.transport().is_some() {
            return Err(ConnectionError::AlreadyOpen);
        }

        let url = target.resolve().await?;

        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.options.max_message_size);
        ws_config.max_frame_size = Some(self.options.max_message_size);

        let (stream, _) =
            match tokio_tungstenite::connect_async_with_config(&url, Some(ws_config), false).await {
                Ok(ok) => ok,
                Err(e) => {
                    // Rejects any wait registered before the attempt.
                    self.shared.finish_closed();
                    return Err(e.into());
                }
            };
        debug!(%url, "WebSocket connected");
        let (write, read) = stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            self.shared.clone(),
            self.codec.clone(),
            write_tx.clone(),
            cancel.clone(),
            self.options.pong_wait,
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            self.options.ping_period,
            cancel.clone(),
        ));

        let transport = Transport {
            write_tx,
            cancel,
            read_handle,
            write_handle,
            ping_handle,
        };

        {
            let mut slot = self.transport();
            if slot.is_some() {
                // A concurrent open won the race; tear ours down.
                transport.shut_down();
                return Err(ConnectionError::AlreadyOpen);
            }
            *slot = Some(transport);
        }

        if !self.shared.set_open() {
            // The transport died while open was still running and the
            // read pump already finalized the close.
            if let Some(t) = self.transport().take() {
                t.shut_down();
            }
            return Err(ConnectionError::Closed);
        }
        self.shared.dispatch_open();
        Ok(())
    }

    /// Encodes and sends one envelope.
    ///
    /// Fails with `NotConnected` in any state other than `Open`, before
    /// touching the transport. There is no queuing: callers that need
    /// to wait for the connection should wait on the `Open` event.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionError::NotConnected);
        }
        let frame = match self.codec.encode(envelope)? {
            WirePayload::Text(text) => tungstenite::Message::Text(text.into()),
            WirePayload::Binary(bytes) => tungstenite::Message::Binary(bytes.into()),
        };
        let write_tx = self
            .transport()
            .as_ref()
            .map(|t| t.write_tx.clone())
            .ok_or(ConnectionError::NotConnected)?;
        write_tx
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Subscribes a listener for one event kind.
    ///
    /// Listeners of the same kind fire in subscription order. No
    /// ordering is guaranteed across kinds.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.subscribe(kind, Arc::new(listener))
    }

    /// Removes a previously subscribed listener.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.shared.unsubscribe(id);
    }

    /// Registers a wait for the first inbound envelope matching
    /// `predicate`. Registration is synchronous; the returned
    /// [`MessageWait`] already observes the message stream, so an
    /// immediate reply to a subsequently sent request cannot be lost.
    pub fn wait_for_message<P>(&self, predicate: P, timeout: Option<Duration>) -> MessageWait
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.shared.waiters.wait_message(predicate, timeout)
    }

    /// Registers a wait for the next lifecycle event of `kind`.
    pub fn wait_for_event(&self, kind: EventKind, timeout: Option<Duration>) -> EventWait {
        self.shared.waiters.wait_event(kind, timeout)
    }

    /// Closes the connection and releases the transport.
    ///
    /// Every outstanding wait is rejected with `ConnectionClosed`.
    /// Idempotent; closing a never-opened connection just moves it to
    /// `Closed`.
    pub async fn close(&self) {
        let transport = self.transport().take();
        if let Some(t) = transport {
            self.shared.begin_closing();
            let _ = t.write_tx.send(tungstenite::Message::Close(None)).await;
            t.cancel.cancel();
        }
        self.shared.finish_closed();
    }
}

impl<C: Codec> Drop for Connection<C> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.transport.lock()
            && let Some(t) = slot.take()
        {
            t.shut_down();
        }
    }
}
