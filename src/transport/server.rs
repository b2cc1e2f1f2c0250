//! WebSocket server for the page-context relay.
//!
//! When the page context runs outside this process, a small relay script in
//! the page connects to a local WebSocket and carries [`BridgeFrame`]s.
//!
//! # Connection Flow
//!
//! 1. Rust binds the server to `localhost:0` (random port)
//! 2. The relay is told the WebSocket URL
//! 3. The relay connects
//! 4. The upgraded stream becomes a [`Channel`] for the messenger
//!
//! [`BridgeFrame`]: crate::protocol::BridgeFrame

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::Channel;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for waiting for the relay to connect.
const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// PendingServer
// ============================================================================

/// A WebSocket server that is bound but not yet connected.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use cplx_bridge::transport::PendingServer;
///
/// let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let ws_url = server.ws_url();
///
/// // Hand ws_url to the page relay...
///
/// let channel = server.accept().await?;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the server is bound to.
    addr: SocketAddr,
    /// How long `accept` waits.
    accept_timeout: Duration,
}

impl PendingServer {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        debug!(port = addr.port(), "Relay server bound");

        Ok(Self {
            listener,
            addr,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        })
    }

    /// Sets how long [`accept`](Self::accept) waits for the relay.
    #[inline]
    #[must_use]
    pub fn with_accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts the relay connection and wraps it in a [`Channel`].
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing connects in time
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(self) -> Result<Channel> {
        let timeout_ms = u64::try_from(self.accept_timeout.as_millis()).unwrap_or(u64::MAX);

        let (stream, addr) = timeout(self.accept_timeout, self.listener.accept())
            .await
            .map_err(|_| Error::connection_timeout(timeout_ms))??;

        debug!(?addr, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(port = self.addr.port(), "Relay connection established");

        Ok(Channel::from_websocket(ws_stream))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message;

    use crate::protocol::{BridgeFrame, MessageData};

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_accept_times_out() {
        let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed")
            .with_accept_timeout(Duration::from_millis(50));

        let err = server.accept().await.expect_err("nothing connects");
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_accept_yields_working_channel() {
        let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");
        let url = server.ws_url();

        let relay = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
            let frame = BridgeFrame::request(MessageData::new("hello", json!({"n": 1})), false);
            let text = serde_json::to_string(&frame).expect("serialize");
            ws.send(Message::Text(text.into())).await.expect("send");
            // Keep the socket open until the server side has read the frame.
            let _ = ws.next().await;
        });

        let channel = server.accept().await.expect("accept");
        let (_tx, mut rx) = channel.into_parts();

        match rx.recv().await {
            Some(BridgeFrame::Request { event, payload, .. }) => {
                assert_eq!(event, "hello");
                assert_eq!(payload, json!({"n": 1}));
            }
            other => panic!("Expected request frame, got {other:?}"),
        }

        relay.abort();
    }
}
