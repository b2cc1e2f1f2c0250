//! Protocol message types.
//!
//! Two protocols meet in this crate:
//!
//! | Layer | Direction | Purpose |
//! |-------|-----------|---------|
//! | [`BridgeFrame`] | Sandbox ↔ Page | Request/response over the cross-context channel |
//! | [`Packet`] | Host socket | Transport framing (open, ping, message, ...) |
//! | [`Envelope`] | Host socket / forwarded frames | `code[event, ...data]` multiplexed messages |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Wire frame codec |
//! | `engine` | Transport packet framing |
//! | `message` | Cross-context message and frame types |

// ============================================================================
// Submodules
// ============================================================================

/// Transport packet framing.
pub mod engine;

/// Wire frame codec.
pub mod envelope;

/// Cross-context message types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{Packet, PacketKind};
pub use envelope::{Envelope, Frame, is_well_formed_envelope, parse, parse_envelope, stringify};
pub use message::{
    BridgeFrame, LONG_POLLING_EVENT, MessageData, PAGE_ACTION_EVENT, PageAction,
    WEB_SOCKET_EVENT, parse_structured_message,
};
