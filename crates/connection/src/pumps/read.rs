//! Read pump: decodes inbound frames and dispatches them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use scrivo_protocol::{Codec, WirePayload};

use crate::connection::Shared;

/// Reads frames from the WebSocket until cancellation, a read error,
/// a close frame, or silence past the pong deadline.
///
/// Any inbound frame resets the deadline, so a busy connection never
/// needs a pong to stay alive. On exit the shared state is moved to
/// `Closed`, which rejects every outstanding wait.
pub(crate) async fn read_pump<S, C>(
    mut read: S,
    shared: Arc<Shared>,
    codec: Arc<C>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    pong_wait: Duration,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    C: Codec,
{
    let deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("nothing received within the pong window, closing");
                break;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + pong_wait);
                        match frame {
                            tungstenite::Message::Text(text) => {
                                handle_frame(
                                    WirePayload::Text(text.as_str().to_owned()),
                                    &shared,
                                    codec.as_ref(),
                                );
                            }
                            tungstenite::Message::Binary(data) => {
                                handle_frame(
                                    WirePayload::Binary(data.to_vec()),
                                    &shared,
                                    codec.as_ref(),
                                );
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        shared.dispatch_error(e.to_string());
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    shared.finish_closed();
}

/// Decodes one frame and routes it to waiters and subscribers.
///
/// Decode failures are surfaced as `Error` events; the connection
/// stays up, because one malformed frame does not invalidate the
/// transport.
fn handle_frame<C: Codec>(payload: WirePayload, shared: &Shared, codec: &C) {
    if payload.format() != codec.wire_format() {
        warn!(
            "dropping {:?} frame, the active codec speaks {:?}",
            payload.format(),
            codec.wire_format()
        );
        shared.dispatch_error(format!("unexpected {:?} frame", payload.format()));
        return;
    }
    match codec.decode(&payload) {
        Ok(envelope) => {
            trace!(action = %envelope.action, id = %envelope.id, "received envelope");
            shared.dispatch_message(envelope);
        }
        Err(e) => {
            warn!("failed to decode inbound frame: {e}");
            shared.dispatch_error(e.to_string());
        }
    }
}
