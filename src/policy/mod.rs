//! Protocol-level policies.
//!
//! Concrete interceptors over the host's own wire traffic, and the one-shot
//! waiters other features await.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cache` | Rate limit and space swap cache invalidation |
//! | `context` | Settings, cache and query box collaborators |
//! | `query` | Outgoing query rewriting |
//! | `schema` | Typed host payloads |
//! | `traffic` | Telemetry suppression, complexity stripping, inspection |
//! | `waiters` | One-shot promise + timeout interceptors |
//!
//! # Default policies
//!
//! [`install_default_policies`] registers, in walk order:
//!
//! 1. complexity flag stripping
//! 2. rate limit invalidation
//! 3. space swap detection
//! 4. telemetry suppression
//! 5. query rewriting

// ============================================================================
// Submodules
// ============================================================================

pub mod cache;
pub mod context;
pub mod query;
pub mod schema;
pub mod traffic;
pub mod waiters;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{detect_space_swap, watch_rate_limits};
pub use context::{
    CacheKey, FileInclusion, MemoryCache, PolicyContext, QueryBoxSelectors, QueryBoxSnapshot,
    QueryBoxState, QueryCache, Settings, SettingsSource,
};
pub use query::{ASK_EVENT, QuerySource, alter_next_query, alter_queries, override_ask, rewrite_ask};
pub use schema::{Space, SpaceFiles, ThreadMessage, UserAiProfile};
pub use traffic::{
    block_telemetry, inspect_long_polling_events, inspect_web_socket_events,
    remove_complexity_identifier,
};
pub use waiters::{
    wait_for, wait_for_collections, wait_for_space_creation, wait_for_upsert_thread_collection,
    wait_for_user_ai_profile,
};

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;

use crate::messenger::{InterceptorHandle, Messenger};

// ============================================================================
// install_default_policies
// ============================================================================

/// Registers the persistent policies and returns their handles in order.
pub fn install_default_policies(messenger: &Messenger, context: &PolicyContext) -> Vec<InterceptorHandle> {
    let handles = vec![
        remove_complexity_identifier(messenger),
        watch_rate_limits(messenger, context),
        detect_space_swap(messenger, context),
        block_telemetry(messenger, context),
        alter_queries(messenger, context),
    ];

    debug!(count = handles.len(), "Default policies installed");

    handles
}

// ============================================================================
// Tests
// ============================================================================
