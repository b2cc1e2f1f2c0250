//! Cross-context channel.
//!
//! A [`Channel`] is one end of a bidirectional, ordered stream of
//! [`BridgeFrame`]s. The messenger does not care what carries the frames:
//!
//! - [`Channel::pair`] links two ends in memory (both contexts in one process)
//! - [`Channel::from_websocket`] pumps JSON text frames over a WebSocket
//!   (page relay connected to a [`PendingServer`](super::PendingServer))

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use serde_json::{from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::protocol::BridgeFrame;

// ============================================================================
// Channel
// ============================================================================

/// One end of a cross-context channel.
#[derive(Debug)]
pub struct Channel {
    /// Frames to the peer.
    outbound: mpsc::UnboundedSender<BridgeFrame>,
    /// Frames from the peer.
    inbound: mpsc::UnboundedReceiver<BridgeFrame>,
}

impl Channel {
    /// Creates two linked in-memory ends.
    ///
    /// Whatever one end sends, the other receives, in order.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        (
            Self {
                outbound: a_tx,
                inbound: b_rx,
            },
            Self {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }

    /// Wraps a WebSocket stream.
    ///
    /// Spawns a pump task that serializes outbound frames as JSON text and
    /// parses inbound text messages. Unparseable text is logged and dropped.
    /// The channel closes when the socket closes or errors.
    pub fn from_websocket<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_pump(ws_stream, outbound_rx, inbound_tx));

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }
    }

    /// Splits the channel into its sender and receiver halves.
    #[inline]
    #[must_use]
    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<BridgeFrame>,
        mpsc::UnboundedReceiver<BridgeFrame>,
    ) {
        (self.outbound, self.inbound)
    }

    /// Pump loop between the socket and the frame queues.
    async fn run_pump<S>(
        ws_stream: WebSocketStream<S>,
        mut outbound_rx: mpsc::UnboundedReceiver<BridgeFrame>,
        inbound_tx: mpsc::UnboundedSender<BridgeFrame>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match from_str::<BridgeFrame>(text.as_str()) {
                                Ok(frame) => {
                                    trace!(id = %frame.id(), "Frame received");
                                    if inbound_tx.send(frame).is_err() {
                                        debug!("Channel receiver dropped");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, text = %text.as_str(), "Failed to parse bridge frame");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Channel socket closed by peer");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Channel socket error");
                            break;
                        }

                        None => {
                            debug!("Channel socket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let json = match to_string(&frame) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize bridge frame");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(error = %e, "Failed to send bridge frame");
                                break;
                            }
                        }

                        None => {
                            debug!("Channel sender dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("Channel pump terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::MessageData;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = Channel::pair();
        let (a_tx, _a_rx) = a.into_parts();
        let (_b_tx, mut b_rx) = b.into_parts();

        let first = BridgeFrame::request(MessageData::new("one", json!(1)), false);
        let second = BridgeFrame::request(MessageData::new("two", json!(2)), false);
        a_tx.send(first.clone()).expect("send");
        a_tx.send(second.clone()).expect("send");

        assert_eq!(b_rx.recv().await, Some(first));
        assert_eq!(b_rx.recv().await, Some(second));
    }

    #[tokio::test]
    async fn test_pair_closes_when_peer_dropped() {
        let (a, b) = Channel::pair();
        drop(a);
        let (_b_tx, mut b_rx) = b.into_parts();
        assert_eq!(b_rx.recv().await, None);
    }
}
