//! cplx-bridge - Cross-context message bridge for a browser extension.
//!
//! This library carries request/response messages between an isolated
//! sandbox and the page context, and runs every inbound message through an
//! ordered pipeline of interceptors that can observe, rewrite or suppress
//! the host's own socket traffic.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────── Bridge ─────────────────────────────┐
//! │                                                                  │
//! │  Messenger ──► Pipeline ──► listeners ──► reply to page context  │
//! │      ▲            │                                              │
//! │      │            └── policies (query rewrite, telemetry, ...)   │
//! │   Channel                                                        │
//! │                                                                  │
//! │  SocketRegistry ──► SocketHandle ──► TtsPlayer ──► AudioSink     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Messenger**: correlates requests with responses, enforces timeouts
//! - **Pipeline**: interceptors walked in registration order
//! - **Policies**: concrete interceptors over socket.io frames
//! - **SocketRegistry**: host sockets opened by this crate, keyed by session id
//! - **TtsPlayer**: voice-over streaming into an embedder-provided sink
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cplx_bridge::{Bridge, Channel, QueryBoxSnapshot, Result, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (sandbox, _page) = Channel::pair();
//!
//!     let bridge = Bridge::builder()
//!         .settings(Arc::new(Settings::default()))
//!         .query_box(Arc::new(QueryBoxSnapshot::default()))
//!         .build(sandbox)?;
//!
//!     bridge.install_default_policies();
//!     bridge.alter_next_query(Some("claude2".to_string()), true);
//!
//!     bridge.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`audio`] | Voice-over player and PCM sink |
//! | [`bridge`] | [`Bridge`] context and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`messenger`] | Request/response messenger and interceptor pipeline |
//! | [`policy`] | Interceptors over the host's wire traffic |
//! | [`protocol`] | Frame codec and message types |
//! | [`transport`] | Channels, sockets and registry |

// ============================================================================
// Modules
// ============================================================================

/// Voice-over audio.
pub mod audio;

/// Bridge context and configuration.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Request/response messenger and interceptor pipeline.
pub mod messenger;

/// Interceptors over the host's wire traffic.
pub mod policy;

/// Frame codec and message types.
pub mod protocol;

/// Channels, host sockets and the socket registry.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Audio types
pub use audio::{AudioSink, PcmChunk, TtsPlayer, TtsVoice};

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, BridgeOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{InterceptorId, RequestId, SessionId};

// Messenger types
pub use messenger::{
    Interceptor, InterceptorHandle, MatchOutcome, Messenger, SendOptions, Verdict,
};

// Policy types
pub use policy::{
    CacheKey, MemoryCache, PolicyContext, QueryBoxSnapshot, QueryBoxState, QueryCache, Settings,
    SettingsSource,
};

// Protocol types
pub use protocol::{BridgeFrame, Envelope, Frame, MessageData, PageAction, parse, stringify};

// Transport types
pub use transport::{Channel, PendingServer, SocketEvent, SocketHandle, SocketRegistry};
