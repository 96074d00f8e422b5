//! Public types for the connection layer.

use std::time::Duration;

use scrivo_protocol::Envelope;
use scrivo_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};

/// Lifecycle state of a [`crate::Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed for a connect attempt; transport not yet established.
    Connecting,
    /// Transport established, envelopes may be sent.
    Open,
    /// Local close in progress.
    Closing,
    /// Transport released. The connection will not recover on its own.
    Closed,
}

/// Kind discriminant for lifecycle and message events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

/// Event broadcast to connection subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The transport handshake completed.
    Opened,
    /// A decoded inbound envelope.
    Message(Envelope),
    /// A read or decode failure that did not kill the connection.
    Error(String),
    /// The transport is gone, locally or remotely initiated.
    Closed,
}

impl ConnectionEvent {
    /// Returns the kind subscribers register for.
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Opened => EventKind::Open,
            ConnectionEvent::Message(_) => EventKind::Message,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Closed => EventKind::Close,
        }
    }
}

/// Handle returned by [`crate::Connection::subscribe`], used to remove
/// the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Maximum inbound/outbound WebSocket message size.
    pub max_message_size: usize,
    /// How often to send keepalive pings.
    pub ping_period: Duration,
    /// Read deadline: the connection is declared dead if nothing
    /// arrives within this window.
    pub pong_wait: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_message_size: WS_MAX_MESSAGE_SIZE,
            ping_period: WS_PING_PERIOD,
            pong_wait: WS_PONG_WAIT,
        }
    }
}

/// Exponential backoff schedule for callers that establish a fresh
/// connection after a close.
///
/// The connection layer itself never reconnects; this is a utility for
/// the application's retry loop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrivo_protocol::{Action, Body};

    #[test]
    fn event_kind_mapping() {
        assert_eq!(ConnectionEvent::Opened.kind(), EventKind::Open);
        assert_eq!(ConnectionEvent::Closed.kind(), EventKind::Close);
        assert_eq!(ConnectionEvent::Error("x".into()).kind(), EventKind::Error);
        let msg = ConnectionEvent::Message(Envelope::new("e", Action::PdfExport, Body::Empty));
        assert_eq!(msg.kind(), EventKind::Message);
    }

    #[test]
    fn connect_options_defaults_follow_protocol_constants() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.max_message_size, WS_MAX_MESSAGE_SIZE);
        assert_eq!(opts.ping_period, WS_PING_PERIOD);
        assert_eq!(opts.pong_wait, WS_PONG_WAIT);
    }

    #[test]
    fn reconnect_delay_backoff_stays_in_jitter_band() {
        let config = ReconnectConfig::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 8s, then capped at 15s.
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let delay = config.delay_for_attempt((i + 1) as u32);
            let secs = delay.as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }
}
