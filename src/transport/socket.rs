//! Live socket handle to the host endpoint.
//!
//! Each handle owns a tokio task that drives one WebSocket:
//!
//! - answers transport pings
//! - strips the transport packet digit from inbound messages
//! - fans inbound traffic out to every subscriber
//! - serializes outbound sends from any number of clones

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::engine::{self, Packet, PacketKind};
use crate::protocol::{Envelope, stringify};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the inbound fan-out queue per subscriber.
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// SocketEvent
// ============================================================================

/// Inbound traffic of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A message packet, transport digit removed (an envelope in text form).
    Message(String),
    /// A binary frame.
    Binary(Vec<u8>),
    /// The socket closed.
    Closed,
}

// ============================================================================
// SocketCommand
// ============================================================================

/// Internal commands for the socket loop.
enum SocketCommand {
    /// Send a text frame as-is.
    Text(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// SocketHandle
// ============================================================================

/// Handle to a live socket. Cheap to clone.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    /// Server-assigned session id.
    session_id: SessionId,
    /// Commands for the socket loop.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    /// Inbound fan-out.
    events: broadcast::Sender<SocketEvent>,
    /// Set once the loop has exited.
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("session_id", &self.inner.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SocketHandle {
    /// Takes ownership of an open WebSocket and spawns its loop.
    pub(crate) fn spawn<S>(ws_stream: WebSocketStream<S>, session_id: SessionId) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_socket_loop(
            ws_stream,
            command_rx,
            events.clone(),
            Arc::clone(&closed),
            session_id.clone(),
        ));

        Self {
            inner: Arc::new(SocketInner {
                session_id,
                command_tx,
                events,
                closed,
            }),
        }
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns `true` once the socket has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Subscribes to inbound traffic from now on.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    /// Sends an application message (the transport digit is added).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket has closed.
    pub fn send_message(&self, payload: &str) -> Result<()> {
        self.send_raw(engine::encode(PacketKind::Message, payload))
    }

    /// Encodes and sends an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket has closed.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.send_message(&stringify(envelope))
    }

    /// Sends a text frame without any transport framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket has closed.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.inner
            .command_tx
            .send(SocketCommand::Text(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.inner.command_tx.send(SocketCommand::Close);
    }

    /// Socket loop that handles WebSocket I/O.
    async fn run_socket_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
        events: broadcast::Sender<SocketEvent>,
        closed: Arc<AtomicBool>,
        session_id: SessionId,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Some(packet) = Packet::decode(text.as_str()) else {
                                trace!(%session_id, "Ignoring undecodable packet");
                                continue;
                            };

                            match packet.kind {
                                PacketKind::Ping => {
                                    let pong = engine::encode(PacketKind::Pong, packet.data);
                                    if let Err(e) = ws_write.send(Message::Text(pong.into())).await {
                                        warn!(%session_id, error = %e, "Failed to answer ping");
                                    }
                                }
                                PacketKind::Message => {
                                    let _ = events.send(SocketEvent::Message(packet.data.to_string()));
                                }
                                PacketKind::Close => {
                                    debug!(%session_id, "Close packet received");
                                    break;
                                }
                                _ => {
                                    trace!(%session_id, kind = ?packet.kind, "Ignoring packet");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            let _ = events.send(SocketEvent::Binary(bytes.to_vec()));
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(%session_id, "Socket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(%session_id, error = %e, "Socket error");
                            break;
                        }

                        None => {
                            debug!(%session_id, "Socket stream ended");
                            break;
                        }

                        // Ignore Ping, Pong, Frame
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SocketCommand::Text(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(%session_id, error = %e, "Failed to send frame");
                                break;
                            }
                        }

                        Some(SocketCommand::Close) | None => {
                            debug!(%session_id, "Closing socket");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        let _ = events.send(SocketEvent::Closed);

        debug!(%session_id, "Socket loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// Connects a handle to a scripted server and returns the server side.
    async fn connected_pair() -> (SocketHandle, WebSocketStream<tokio::net::TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio_tungstenite::accept_async(stream).await.expect("upgrade")
        });

        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect");
        let handle = SocketHandle::spawn(client, SessionId::new("test-sid"));
        let server = server.await.expect("server task");

        (handle, server)
    }

    #[tokio::test]
    async fn test_send_message_adds_transport_digit() {
        let (handle, mut server) = connected_pair().await;

        handle
            .send_envelope(&Envelope::event(2, "voice_over", vec![]))
            .expect("send");

        let received = server.next().await.expect("frame").expect("ok");
        assert_eq!(received, Message::Text(r#"42["voice_over"]"#.into()));
    }

    #[tokio::test]
    async fn test_inbound_fan_out_and_ping() {
        let (handle, mut server) = connected_pair().await;
        let mut events = handle.subscribe();

        server.send(Message::Text("2".into())).await.expect("ping");
        server
            .send(Message::Text(r#"42["status"]"#.into()))
            .await
            .expect("message");
        server
            .send(Message::Binary(vec![1u8, 0, 2, 0].into()))
            .await
            .expect("binary");

        let pong = server.next().await.expect("frame").expect("ok");
        assert_eq!(pong, Message::Text("3".into()));

        let first = timeout(Duration::from_secs(1), events.recv()).await.expect("in time");
        assert_eq!(first.expect("event"), SocketEvent::Message(r#"2["status"]"#.to_string()));

        let second = timeout(Duration::from_secs(1), events.recv()).await.expect("in time");
        assert_eq!(second.expect("event"), SocketEvent::Binary(vec![1, 0, 2, 0]));
    }

    #[tokio::test]
    async fn test_close_marks_handle_closed() {
        let (handle, _server) = connected_pair().await;
        let mut events = handle.subscribe();

        handle.close();

        let event = timeout(Duration::from_secs(1), events.recv()).await.expect("in time");
        assert_eq!(event.expect("event"), SocketEvent::Closed);
        assert!(handle.is_closed());
        assert!(matches!(handle.send_message("x"), Err(Error::ConnectionClosed)));
    }
}
