//! Persistent WebSocket connection to the Scrivo job service.
//!
//! The [`Connection`] owns the transport, translates wire frames to
//! typed envelopes through a pluggable codec, and bridges event-driven
//! delivery into single-resolution async waits. Reconnection is the
//! caller's responsibility; this layer reports `Closed` and stops.

pub mod connection;
pub(crate) mod pumps;
pub mod target;
pub mod types;
pub mod waiter;

pub use connection::{Connection, ConnectionError};
pub use target::{ConnectTarget, TargetError};
pub use types::{
    ConnectOptions, ConnectionEvent, ConnectionState, EventKind, ListenerId, ReconnectConfig,
};
pub use waiter::{EventWait, MessageWait, WaitError};
