//! One-shot waiters.
//!
//! A waiter registers an interceptor whose match is a predicate over the
//! working message, resolves with the value the predicate extracted, and
//! deregisters itself once it fired or when its window elapses first.
//! Waited-for messages are always forwarded unchanged.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::messenger::{Interceptor, Messenger, Verdict};
use crate::protocol::{MessageData, parse_structured_message};

use super::schema::{Space, UserAiProfile};

// ============================================================================
// Constants
// ============================================================================

/// Window of [`wait_for_upsert_thread_collection`] when none is given.
pub const UPSERT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AI_PROFILE_TIMEOUT: Duration = Duration::from_secs(5);
const COLLECTIONS_TIMEOUT: Duration = Duration::from_secs(3);
const SPACE_CREATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgement code carrying the user AI profile.
const USER_AI_PROFILE_CODE: u32 = 430;
/// Acknowledgement code carrying the space list.
const COLLECTIONS_CODE: u32 = 431;

// ============================================================================
// wait_for
// ============================================================================

/// Waits for the first pipeline message `extract` accepts.
///
/// # Errors
///
/// - [`Error::Timeout`] naming `operation` if nothing matched within `window`
/// - [`Error::ConnectionClosed`] if the pipeline went away first
pub async fn wait_for<T, F>(
    messenger: &Messenger,
    operation: &'static str,
    window: Duration,
    extract: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Fn(&MessageData) -> Option<T> + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    // Stop once fired; the stop condition sees the original message.
    let fired = Arc::new(AtomicBool::new(false));
    let fired_stop = Arc::clone(&fired);

    let handle = messenger.add_interceptor(
        Interceptor::new(
            move |message: &MessageData| extract(message).into(),
            move |message: MessageData, value: T| {
                if let Some(tx) = tx.lock().take() {
                    fired.store(true, Ordering::SeqCst);
                    let _ = tx.send(value);
                }
                async move { Ok(Verdict::Forward(message)) }
            },
        )
        .stop_when(move |_| fired_stop.load(Ordering::SeqCst)),
    );

    match timeout(window, rx).await {
        Ok(Ok(value)) => {
            handle.remove();
            Ok(value)
        }
        Ok(Err(_)) => {
            handle.remove();
            Err(Error::ConnectionClosed)
        }
        Err(_) => {
            handle.remove();
            let timeout_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
            debug!(operation, timeout_ms, "Waiter timed out");
            Err(Error::timeout(operation, timeout_ms))
        }
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// A single data object whose `status` is `completed`.
#[must_use]
pub fn upsert_completed(message: &MessageData) -> Option<()> {
    let envelope = parse_structured_message(message)?;
    (envelope.data.len() == 1 && envelope.object_at(0)?.get("status")? == "completed").then_some(())
}

/// A `430` acknowledgement with one element that is a valid profile.
#[must_use]
pub fn user_ai_profile(message: &MessageData) -> Option<UserAiProfile> {
    let envelope = parse_structured_message(message)?;
    if envelope.message_code != USER_AI_PROFILE_CODE || envelope.data.len() != 1 {
        return None;
    }
    serde_json::from_value(envelope.data[0].clone()).ok()
}

/// A `431` acknowledgement with one element that is a non-empty space list.
#[must_use]
pub fn collections(message: &MessageData) -> Option<Vec<Space>> {
    let envelope = parse_structured_message(message)?;
    if envelope.message_code != COLLECTIONS_CODE || envelope.data.len() != 1 {
        return None;
    }
    let spaces: Vec<Space> = serde_json::from_value(envelope.data[0].clone()).ok()?;
    (!spaces.is_empty()).then_some(spaces)
}

/// A completed space, described by title, description and instructions.
#[must_use]
pub fn space_created(message: &MessageData) -> Option<()> {
    let envelope = parse_structured_message(message)?;
    if envelope.message_code == USER_AI_PROFILE_CODE || envelope.data.len() != 1 {
        return None;
    }
    let object = envelope.object_at(0)?;
    let complete = object.get("status").is_some_and(|status| status == "completed")
        && ["title", "description", "instructions"]
            .iter()
            .all(|key| object.contains_key(*key));
    complete.then_some(())
}

// ============================================================================
// Waiters
// ============================================================================

/// Waits for a thread collection upsert to complete.
///
/// # Errors
///
/// [`Error::Timeout`] if it does not complete within `window`.
pub async fn wait_for_upsert_thread_collection(messenger: &Messenger, window: Duration) -> Result<()> {
    wait_for(messenger, "Thread collection upsert", window, upsert_completed).await
}

/// Waits for the user AI profile push.
///
/// # Errors
///
/// [`Error::Timeout`] after 5 seconds.
pub async fn wait_for_user_ai_profile(messenger: &Messenger) -> Result<UserAiProfile> {
    wait_for(
        messenger,
        "Fetching user profile settings",
        USER_AI_PROFILE_TIMEOUT,
        user_ai_profile,
    )
    .await
}

/// Waits for the space list push.
///
/// # Errors
///
/// [`Error::Timeout`] after 3 seconds.
pub async fn wait_for_collections(messenger: &Messenger) -> Result<Vec<Space>> {
    wait_for(messenger, "Fetching spaces", COLLECTIONS_TIMEOUT, collections).await
}

/// Waits for a newly created space to complete.
///
/// # Errors
///
/// [`Error::Timeout`] after 5 seconds.
pub async fn wait_for_space_creation(messenger: &Messenger) -> Result<()> {
    wait_for(messenger, "Space creation", SPACE_CREATION_TIMEOUT, space_created).await
}

// ============================================================================
// Tests
// ============================================================================
