//! Session socket registry.
//!
//! Maps server-assigned session ids to live [`SocketHandle`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           SocketRegistry                │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "lv_VI97HAX..." → SocketHandle  │    │
//! │  │ "9pQ2mXcZ0f..." → SocketHandle  │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A handshake never deduplicates: two handshakes yield two sessions.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::engine::{self, Packet, PacketKind};

use super::SocketHandle;

// ============================================================================
// Constants
// ============================================================================

/// Namespace connect packet sent right after the open packet.
const NAMESPACE_CONNECT: &str = "0";

// ============================================================================
// SocketRegistry
// ============================================================================

/// Registry of live sockets keyed by session id.
///
/// # Example
///
/// ```ignore
/// let registry = SocketRegistry::new(endpoint, Duration::from_secs(10));
///
/// let socket = registry.handshake(None).await?;
/// assert!(registry.get_socket(socket.session_id()).is_some());
///
/// registry.remove_socket(socket.session_id());
/// ```
pub struct SocketRegistry {
    /// Endpoint every handshake connects to.
    endpoint: Url,

    /// Upper bound for connect + open packet.
    handshake_timeout: Duration,

    /// Live sockets by session id.
    sockets: RwLock<FxHashMap<SessionId, SocketHandle>>,
}

// ============================================================================
// SocketRegistry - Constructor
// ============================================================================

impl SocketRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(endpoint: Url, handshake_timeout: Duration) -> Self {
        Self {
            endpoint,
            handshake_timeout,
            sockets: RwLock::new(FxHashMap::default()),
        }
    }
}

// ============================================================================
// SocketRegistry - Public API
// ============================================================================

impl SocketRegistry {
    /// Opens a socket to the endpoint and registers it.
    ///
    /// Every message before the open packet is ignored. Once the open packet
    /// arrives, the namespace connect packet is sent and the handle is stored
    /// under the session id it carried.
    ///
    /// # Arguments
    ///
    /// * `src` - Optional `src` query parameter identifying the caller
    ///
    /// # Errors
    ///
    /// - [`Error::WebSocket`] if the connection cannot be established
    /// - [`Error::Handshake`] if the socket errors or closes before the open packet
    /// - [`Error::ConnectionTimeout`] if the open packet does not arrive in time
    pub async fn handshake(&self, src: Option<&str>) -> Result<SocketHandle> {
        let url = self.handshake_url(src);
        let timeout_ms = u64::try_from(self.handshake_timeout.as_millis()).unwrap_or(u64::MAX);

        debug!(%url, "Starting socket handshake");

        let handle = timeout(self.handshake_timeout, self.open(url))
            .await
            .map_err(|_| Error::connection_timeout(timeout_ms))??;

        self.sockets
            .write()
            .insert(handle.session_id().clone(), handle.clone());

        info!(session_id = %handle.session_id(), "Socket registered");

        Ok(handle)
    }

    /// Returns the socket registered under `session_id`.
    #[inline]
    #[must_use]
    pub fn get_socket(&self, session_id: &SessionId) -> Option<SocketHandle> {
        self.sockets.read().get(session_id).cloned()
    }

    /// Removes and closes the socket registered under `session_id`.
    ///
    /// Returns `true` if a socket was registered.
    pub fn remove_socket(&self, session_id: &SessionId) -> bool {
        let removed = self.sockets.write().remove(session_id);

        match removed {
            Some(handle) => {
                handle.close();
                debug!(%session_id, "Socket removed from registry");
                true
            }
            None => false,
        }
    }

    /// Returns the number of registered sockets.
    #[inline]
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.sockets.read().len()
    }

    /// Closes and forgets every socket.
    pub fn close_all(&self) {
        let sockets: Vec<_> = self.sockets.write().drain().collect();

        for (session_id, handle) in sockets {
            handle.close();
            debug!(%session_id, "Socket closed during teardown");
        }
    }

    /// Returns the URL a handshake connects to.
    #[must_use]
    pub fn handshake_url(&self, src: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(src) = src {
            url.query_pairs_mut().append_pair("src", src);
        }
        url
    }
}

// ============================================================================
// SocketRegistry - Handshake
// ============================================================================

impl SocketRegistry {
    /// Connects and waits for the open packet.
    async fn open(&self, url: Url) -> Result<SocketHandle> {
        let (mut ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let sid = loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(sid) = Packet::decode(text.as_str()).and_then(|p| p.open_sid()) {
                        break sid;
                    }
                    trace!(text = %text.as_str(), "Ignoring message before open packet");
                }

                Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::handshake("socket closed before open packet"));
                }

                Some(Err(e)) => {
                    return Err(Error::handshake(e.to_string()));
                }

                // Binary, Ping, Pong before open are ignored
                Some(Ok(_)) => {}
            }
        };

        let connect = engine::encode(PacketKind::Message, NAMESPACE_CONNECT);
        ws_stream.send(Message::Text(connect.into())).await?;

        Ok(SocketHandle::spawn(ws_stream, SessionId::new(sid)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    use crate::transport::SocketEvent;

    /// Serves one connection, sending `script` before expecting the
    /// namespace connect packet.
    async fn scripted_endpoint(script: Vec<Message>) -> (Url, tokio::task::JoinHandle<Option<Message>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            for message in script {
                if ws.send(message).await.is_err() {
                    return None;
                }
            }
            let first = ws.next().await.and_then(|m| m.ok());
            // Hold the connection open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
            first
        });

        let url = Url::parse(&format!("ws://{addr}/socket.io/?EIO=4&transport=websocket"))
            .expect("url");
        (url, task)
    }

    #[tokio::test]
    async fn test_handshake_registers_session() {
        let (url, server) = scripted_endpoint(vec![
            Message::Text("2".into()),
            Message::Binary(vec![0u8, 1].into()),
            Message::Text(r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[]}"#.into()),
        ])
        .await;

        let registry = SocketRegistry::new(url, Duration::from_secs(5));
        let socket = registry.handshake(None).await.expect("handshake");

        assert_eq!(socket.session_id().as_str(), "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(registry.socket_count(), 1);
        assert!(registry.get_socket(socket.session_id()).is_some());

        registry.close_all();
        assert_eq!(registry.socket_count(), 0);

        let connect = server.await.expect("server task");
        assert_eq!(connect, Some(Message::Text("40".into())));
    }

    #[tokio::test]
    async fn test_handshake_fails_when_closed_before_open() {
        let (url, _server) = scripted_endpoint(vec![
            Message::Text(r#"42["noise"]"#.into()),
            Message::Close(None),
        ])
        .await;

        let registry = SocketRegistry::new(url, Duration::from_secs(5));
        let err = registry.handshake(None).await.expect_err("must fail");

        assert!(err.is_connection_error());
        assert_eq!(registry.socket_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/")).expect("url");
        let registry = SocketRegistry::new(url, Duration::from_secs(5));

        assert!(registry.handshake(None).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_socket_closes_handle() {
        let (url, _server) =
            scripted_endpoint(vec![Message::Text(r#"0{"sid":"abc"}"#.into())]).await;

        let registry = SocketRegistry::new(url, Duration::from_secs(5));
        let socket = registry.handshake(None).await.expect("handshake");
        let mut events = socket.subscribe();

        assert!(registry.remove_socket(socket.session_id()));
        assert!(!registry.remove_socket(socket.session_id()));
        assert!(registry.get_socket(socket.session_id()).is_none());

        let event = timeout(Duration::from_secs(1), events.recv()).await.expect("in time");
        assert_eq!(event.expect("event"), SocketEvent::Closed);
    }

    #[test]
    fn test_handshake_url_appends_src() {
        let url = Url::parse("wss://www.perplexity.ai/socket.io/?EIO=4&transport=websocket")
            .expect("url");
        let registry = SocketRegistry::new(url, Duration::from_secs(5));

        assert_eq!(
            registry.handshake_url(Some("tts")).as_str(),
            "wss://www.perplexity.ai/socket.io/?EIO=4&transport=websocket&src=tts"
        );
        assert_eq!(
            registry.handshake_url(None).as_str(),
            "wss://www.perplexity.ai/socket.io/?EIO=4&transport=websocket"
        );
    }
}
