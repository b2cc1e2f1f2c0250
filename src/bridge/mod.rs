//! Bridge context and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`BridgeBuilder`] |
//! | `core` | [`Bridge`] and its lazily created services |
//! | `options` | [`BridgeOptions`] |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for bridge configuration.
pub mod builder;

/// Bridge context.
pub mod core;

/// Timeouts and endpoints.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Bridge;
pub use builder::BridgeBuilder;
pub use options::{BridgeOptions, DEFAULT_MESSAGE_BLOCK_SELECTOR, DEFAULT_SOCKET_ENDPOINT};
