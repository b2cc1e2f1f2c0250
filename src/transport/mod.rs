//! Transport layer.
//!
//! Two independent links leave this crate:
//!
//! ```text
//! ┌──────────────────┐     Channel (BridgeFrame)     ┌──────────────────┐
//! │  Sandbox         │◄─────────────────────────────►│  Page context    │
//! │  (Messenger)     │   in-memory or WebSocket      │  (relay script)  │
//! └──────────────────┘                               └──────────────────┘
//!
//! ┌──────────────────┐     SocketHandle (packets)    ┌──────────────────┐
//! │  SocketRegistry  │◄─────────────────────────────►│  Host endpoint   │
//! │  sid → handle    │   wss://.../socket.io/        │                  │
//! └──────────────────┘                               └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Cross-context frame channel |
//! | `registry` | Session id → socket registry and handshake |
//! | `server` | Local WebSocket server for the page relay |
//! | `socket` | Live socket handle and its I/O loop |

// ============================================================================
// Submodules
// ============================================================================

/// Cross-context frame channel.
pub mod channel;

/// Session socket registry.
pub mod registry;

/// WebSocket server for the page relay.
pub mod server;

/// Live socket handle.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::Channel;
pub use registry::SocketRegistry;
pub use server::PendingServer;
pub use socket::{SocketEvent, SocketHandle};
