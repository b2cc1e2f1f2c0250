//! Ordered interceptor pipeline.
//!
//! # Walk
//!
//! ```text
//! inbound ──► [0] match? ─► callback ─► stop? ─► [1] match? ─► ... ─► surviving
//!                 │             │
//!                 │             └─ Suppress ─► walk ends, nothing survives
//!                 └─ stop_propagation and matched ─► walk ends
//! ```
//!
//! Match conditions see the working message (rewritten by earlier
//! callbacks). Stop conditions always see the original inbound message.

// ============================================================================
// Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use crate::identifiers::InterceptorId;
use crate::protocol::MessageData;

use super::interceptor::{Interceptor, Stage, Verdict};

// ============================================================================
// Entry
// ============================================================================

/// A registered interceptor.
struct Entry {
    id: InterceptorId,
    stage: Box<dyn Stage>,
    /// Set on first match; a matched entry never expires.
    matched: AtomicBool,
    /// Set once the entry leaves the pipeline.
    removed: AtomicBool,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered list of interceptors.
///
/// Registration order is walk order. Registrations and removals made during
/// a walk take effect for the next message; removals also skip the removed
/// entry in walks already in progress.
#[derive(Default)]
pub struct Pipeline {
    entries: RwLock<Vec<Arc<Entry>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("len", &self.len()).finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends an interceptor and returns its handle.
    ///
    /// An interceptor with a timeout is removed when the window elapses
    /// without a match. Expiry needs a running tokio runtime; outside one
    /// the timeout is ignored.
    pub fn register<A: Send + 'static>(self: &Arc<Self>, interceptor: Interceptor<A>) -> InterceptorHandle {
        let id = InterceptorId::next();
        let expiry = interceptor.timeout();

        let entry = Arc::new(Entry {
            id,
            stage: Box::new(interceptor),
            matched: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        });

        self.entries.write().push(Arc::clone(&entry));
        trace!(%id, "Interceptor registered");

        if let Some(window) = expiry {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let pipeline = Arc::downgrade(self);
                    let entry = Arc::downgrade(&entry);
                    runtime.spawn(async move {
                        tokio::time::sleep(window).await;
                        Self::expire(pipeline, entry);
                    });
                }
                Err(_) => {
                    warn!(%id, "No runtime, interceptor timeout ignored");
                }
            }
        }

        InterceptorHandle {
            id,
            pipeline: Arc::downgrade(self),
        }
    }

    /// Removes an interceptor. Returns `true` if it was registered.
    pub fn remove(&self, id: InterceptorId) -> bool {
        let mut entries = self.entries.write();
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        entries.remove(index).removed.store(true, Ordering::SeqCst);

        trace!(%id, "Interceptor removed");
        true
    }

    /// Returns `true` if the interceptor is registered.
    #[must_use]
    pub fn contains(&self, id: InterceptorId) -> bool {
        self.entries.read().iter().any(|entry| entry.id == id)
    }

    /// Returns the number of registered interceptors.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Walks the pipeline for one message.
    ///
    /// Returns the surviving message, or `None` if it was suppressed.
    pub async fn run(&self, inbound: MessageData) -> Option<MessageData> {
        let snapshot: Vec<Arc<Entry>> = self.entries.read().clone();
        let mut working = inbound.clone();

        for entry in snapshot {
            if entry.removed.load(Ordering::SeqCst) {
                continue;
            }

            let mut suppressed = false;
            let mut claimed = false;

            let pending = std::panic::catch_unwind(AssertUnwindSafe(|| entry.stage.evaluate(&working)))
                .unwrap_or_else(|_| {
                    error!(id = %entry.id, "Interceptor match condition panicked");
                    None
                });

            if let Some(callback) = pending {
                entry.matched.store(true, Ordering::SeqCst);
                trace!(id = %entry.id, event = %working.event, "Interceptor matched");

                match AssertUnwindSafe(callback).catch_unwind().await {
                    Ok(Ok(Verdict::Forward(message))) => working = message,
                    Ok(Ok(Verdict::Suppress)) => suppressed = true,
                    Ok(Err(e)) => {
                        warn!(id = %entry.id, error = %e, "Interceptor callback failed, forwarding unchanged");
                    }
                    Err(_) => {
                        error!(id = %entry.id, "Interceptor callback panicked, forwarding unchanged");
                    }
                }

                claimed = entry.stage.stops_propagation();
            }

            let stop = std::panic::catch_unwind(AssertUnwindSafe(|| entry.stage.should_stop(&inbound)))
                .unwrap_or_else(|_| {
                    error!(id = %entry.id, "Interceptor stop condition panicked");
                    false
                });
            if stop {
                self.remove(entry.id);
            }

            if suppressed {
                debug!(id = %entry.id, event = %inbound.event, "Message suppressed");
                return None;
            }
            if claimed {
                break;
            }
        }

        Some(working)
    }

    /// Removes an entry whose window elapsed without a match.
    fn expire(pipeline: Weak<Self>, entry: Weak<Entry>) {
        let (Some(pipeline), Some(entry)) = (pipeline.upgrade(), entry.upgrade()) else {
            return;
        };

        if !entry.matched.load(Ordering::SeqCst) && pipeline.remove(entry.id) {
            debug!(id = %entry.id, "Interceptor expired without a match");
        }
    }
}

// ============================================================================
// InterceptorHandle
// ============================================================================

/// Handle to a registered interceptor.
///
/// Dropping the handle does not remove the interceptor.
#[derive(Debug, Clone)]
pub struct InterceptorHandle {
    id: InterceptorId,
    pipeline: Weak<Pipeline>,
}

impl InterceptorHandle {
    /// Returns the interceptor id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> InterceptorId {
        self.id
    }

    /// Removes the interceptor. Idempotent.
    ///
    /// Returns `true` only for the call that removed it.
    pub fn remove(&self) -> bool {
        self.pipeline
            .upgrade()
            .is_some_and(|pipeline| pipeline.remove(self.id))
    }

    /// Returns `true` while the interceptor is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pipeline
            .upgrade()
            .is_some_and(|pipeline| pipeline.contains(self.id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::error::Error;
    use crate::messenger::MatchOutcome;

    fn message(event: &str) -> MessageData {
        MessageData::new(event, json!({}))
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Interceptor {
        let log = Arc::clone(log);
        Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            move |message: MessageData, ()| {
                log.lock().push(name);
                async move { Ok(Verdict::Forward(message)) }
            },
        )
    }

    #[tokio::test]
    async fn test_walk_runs_in_registration_order() {
        let pipeline = Pipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        pipeline.register(recording(&log, "a"));
        pipeline.register(recording(&log, "b"));
        pipeline.register(recording(&log, "c"));

        let survived = pipeline.run(message("x")).await;

        assert_eq!(survived, Some(message("x")));
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_rewrite_is_seen_by_later_matches() {
        let pipeline = Pipeline::new();

        pipeline.register(Interceptor::new(
            |m: &MessageData| MatchOutcome::from_bool(m.event == "x"),
            |_: MessageData, ()| async { Ok(Verdict::Forward(MessageData::new("y", json!(1)))) },
        ));
        pipeline.register(Interceptor::new(
            |m: &MessageData| MatchOutcome::from_bool(m.event == "y"),
            |m: MessageData, ()| async move {
                Ok(Verdict::Forward(MessageData::new(m.event, json!(2))))
            },
        ));

        assert_eq!(pipeline.run(message("x")).await, Some(MessageData::new("y", json!(2))));
    }

    #[tokio::test]
    async fn test_suppress_ends_walk() {
        let pipeline = Pipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        pipeline.register(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            |_: MessageData, ()| async { Ok(Verdict::Suppress) },
        ));
        pipeline.register(recording(&log, "later"));

        assert_eq!(pipeline.run(message("x")).await, None);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_condition_deregisters_after_first_match() {
        let pipeline = Pipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = pipeline.register(
            Interceptor::new(
                |m: &MessageData| MatchOutcome::from_bool(m.event == "x"),
                move |m: MessageData, ()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(Verdict::Forward(m)) }
                },
            )
            .stop_when(|m| m.event == "x"),
        );

        pipeline.run(message("other")).await;
        assert!(handle.is_active());

        pipeline.run(message("x")).await;
        pipeline.run(message("x")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_stop_condition_sees_original_message() {
        let pipeline = Pipeline::new();

        pipeline.register(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            |_: MessageData, ()| async { Ok(Verdict::Forward(message("rewritten"))) },
        ));
        let watcher = pipeline.register(
            Interceptor::new(
                |_: &MessageData| MatchOutcome::<()>::Unmatched,
                |m: MessageData, ()| async move { Ok(Verdict::Forward(m)) },
            )
            .stop_when(|m| m.event == "original"),
        );

        pipeline.run(message("original")).await;
        assert!(!watcher.is_active());
    }

    #[tokio::test]
    async fn test_stop_propagation_claims_message() {
        let pipeline = Pipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        pipeline.register(recording(&log, "claim").stop_propagation());
        pipeline.register(recording(&log, "later"));

        assert!(pipeline.run(message("x")).await.is_some());
        assert_eq!(*log.lock(), vec!["claim"]);
    }

    #[tokio::test]
    async fn test_callback_error_and_panic_forward_unchanged() {
        let pipeline = Pipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        pipeline.register(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            |_: MessageData, ()| async { Err(Error::protocol("broken")) },
        ));
        pipeline.register(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            |_: MessageData, ()| async {
                if true {
                    panic!("callback bug");
                }
                Ok(Verdict::Suppress)
            },
        ));
        pipeline.register(recording(&log, "after"));

        assert_eq!(pipeline.run(message("x")).await, Some(message("x")));
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_entry_removed_mid_walk_is_skipped() {
        let pipeline = Pipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let target: Arc<Mutex<Option<InterceptorHandle>>> = Arc::new(Mutex::new(None));

        pipeline.register(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            {
                let target = Arc::clone(&target);
                move |message: MessageData, ()| {
                    if let Some(handle) = target.lock().take() {
                        handle.remove();
                    }
                    async move { Ok(Verdict::Forward(message)) }
                }
            },
        ));
        *target.lock() = Some(pipeline.register(recording(&log, "removed")));
        pipeline.register(recording(&log, "kept"));

        assert_eq!(pipeline.run(message("x")).await, Some(message("x")));
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_remove_is_idempotent() {
        let pipeline = Pipeline::new();
        let handle = pipeline.register(recording(&Arc::new(Mutex::new(Vec::new())), "a"));

        assert_eq!(pipeline.len(), 1);
        assert!(handle.remove());
        assert!(!handle.remove());
        assert!(pipeline.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_interceptor_expires() {
        let pipeline = Pipeline::new();
        let handle = pipeline.register(
            Interceptor::new(
                |_: &MessageData| MatchOutcome::<()>::Unmatched,
                |m: MessageData, ()| async move { Ok(Verdict::Forward(m)) },
            )
            .with_timeout(Duration::from_secs(5)),
        );

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert!(handle.is_active());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_matched_interceptor_does_not_expire() {
        let pipeline = Pipeline::new();
        let handle = pipeline.register(
            recording(&Arc::new(Mutex::new(Vec::new())), "a").with_timeout(Duration::from_secs(1)),
        );

        pipeline.run(message("x")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(handle.is_active());
    }
}
