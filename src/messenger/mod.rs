//! Cross-context messenger.
//!
//! Request/response calls between the sandbox and the page context, and the
//! interceptor pipeline every inbound message walks before it is answered.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Messenger`] and its event loop |
//! | `interceptor` | Interceptor registrations |
//! | `pipeline` | Ordered walk and handles |

// ============================================================================
// Submodules
// ============================================================================

/// Messenger and event loop.
pub mod core;

/// Interceptor registrations.
pub mod interceptor;

/// Ordered interceptor pipeline.
pub mod pipeline;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{DEFAULT_REQUEST_TIMEOUT, MessageListener, Messenger, SendOptions, WeakMessenger};
pub use interceptor::{Interceptor, MatchOutcome, Verdict};
pub use pipeline::{InterceptorHandle, Pipeline};
