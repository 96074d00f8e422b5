//! Write pump: the connection's single writer path.
//!
//! All outbound frames funnel through one mpsc channel into this task,
//! so concurrent senders can never interleave partial writes.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Drains the outbound channel into the WebSocket sink until
/// cancellation, a write error, or the channel closing.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            error!("WebSocket write error: {e}");
            break;
        }
    }

    // Best-effort close frame so the peer sees a clean shutdown.
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}
