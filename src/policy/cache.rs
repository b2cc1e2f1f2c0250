//! Cache invalidation policies.
//!
//! - Rate limit pushes make the cached user settings stale.
//! - Moving a thread into or out of a space makes its cached thread info
//!   stale, once the host confirms the move.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, warn};

use crate::messenger::{Interceptor, InterceptorHandle, MatchOutcome, Messenger, Verdict};
use crate::protocol::{Envelope, MessageData, parse_structured_message};

use super::context::{CacheKey, PolicyContext};
use super::waiters::{UPSERT_TIMEOUT, wait_for_upsert_thread_collection};

// ============================================================================
// Constants
// ============================================================================

const RATE_LIMIT_EVENTS: [&str; 2] = ["get_rate_limit", "get_opus_rate_limit"];

const UPSERT_COLLECTION_EVENT: &str = "upsert_thread_collection";
const REMOVE_COLLECTION_EVENT: &str = "remove_collection_thread";

// ============================================================================
// Predicates
// ============================================================================

fn is_rate_limit(envelope: &Envelope) -> bool {
    RATE_LIMIT_EVENTS.iter().any(|event| envelope.is_event(event))
}

fn is_space_swap(envelope: &Envelope) -> bool {
    let moved_in = envelope.is_event(UPSERT_COLLECTION_EVENT)
        && envelope
            .object_at(0)
            .is_some_and(|object| object.contains_key("new_collection_uuid"));

    moved_in || envelope.is_event(REMOVE_COLLECTION_EVENT)
}

// ============================================================================
// Policies
// ============================================================================

/// Invalidates `["userSettings"]` on every rate limit query.
pub fn watch_rate_limits(messenger: &Messenger, context: &PolicyContext) -> InterceptorHandle {
    let cache = context.cache.clone();

    messenger.add_interceptor(Interceptor::new(
        |message: &MessageData| {
            MatchOutcome::from_bool(parse_structured_message(message).is_some_and(|e| is_rate_limit(&e)))
        },
        move |message: MessageData, ()| {
            cache.invalidate(&CacheKey::user_settings(), false);
            debug!("User settings invalidated after rate limit query");
            async move { Ok(Verdict::Forward(message)) }
        },
    ))
}

/// Invalidates the open thread's info after it moves between spaces.
///
/// The invalidation waits for the host to confirm the upsert. When no
/// confirmation arrives within 5 seconds the cache is left alone.
pub fn detect_space_swap(messenger: &Messenger, context: &PolicyContext) -> InterceptorHandle {
    let weak = messenger.downgrade();
    let context = context.clone();

    messenger.add_interceptor(Interceptor::new(
        |message: &MessageData| {
            MatchOutcome::from_bool(parse_structured_message(message).is_some_and(|e| is_space_swap(&e)))
        },
        move |message: MessageData, ()| {
            let weak = weak.clone();
            let context = context.clone();

            tokio::spawn(async move {
                // Let the current walk finish before registering the waiter.
                tokio::task::yield_now().await;

                let Some(messenger) = weak.upgrade() else {
                    return;
                };

                match wait_for_upsert_thread_collection(&messenger, UPSERT_TIMEOUT).await {
                    Ok(()) => {
                        let slug = context.query_box.snapshot().thread_slug;
                        context.cache.invalidate(&CacheKey::thread_info(&slug), true);
                        debug!(%slug, "Thread info invalidated after space swap");
                    }
                    Err(e) => {
                        warn!(error = %e, "Space swap not confirmed, thread info kept");
                    }
                }
            });

            async move { Ok(Verdict::Forward(message)) }
        },
    ))
}

// ============================================================================
// Tests
// ============================================================================
