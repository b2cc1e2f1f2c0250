//! Interceptor registrations.
//!
//! An interceptor is a predicate/transform/stop triple:
//!
//! | Part | Signature | Runs |
//! |------|-----------|------|
//! | match condition | `Fn(&MessageData) -> MatchOutcome<A>` | every walked message |
//! | callback | `Fn(MessageData, A) -> Future<Result<Verdict>>` | only on match |
//! | stop condition | `Fn(&MessageData) -> bool` | every walked message, on the original |
//!
//! The match condition may extract typed context `A` that is moved into the
//! callback, so the callback never re-parses what the match already decoded.
//!
//! # Example
//!
//! ```ignore
//! use cplx_bridge::messenger::{Interceptor, MatchOutcome, Verdict};
//!
//! let handle = messenger.add_interceptor(
//!     Interceptor::new(
//!         |message| MatchOutcome::from_bool(message.event == "webSocketEvent"),
//!         |message, ()| async move { Ok(Verdict::Forward(message)) },
//!     )
//!     .stop_when(|_| false),
//! );
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::protocol::MessageData;

// ============================================================================
// MatchOutcome
// ============================================================================

/// Result of a match condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome<A> {
    /// The interceptor applies; carries context for the callback.
    Matched(A),
    /// The interceptor does not apply.
    Unmatched,
}

impl<A> MatchOutcome<A> {
    /// Returns `true` for [`MatchOutcome::Matched`].
    #[inline]
    #[must_use]
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

impl MatchOutcome<()> {
    /// Builds a context-free outcome from a boolean.
    #[inline]
    #[must_use]
    pub fn from_bool(matched: bool) -> Self {
        if matched { Self::Matched(()) } else { Self::Unmatched }
    }
}

impl<A> From<Option<A>> for MatchOutcome<A> {
    fn from(value: Option<A>) -> Self {
        match value {
            Some(args) => Self::Matched(args),
            None => Self::Unmatched,
        }
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// What a callback decided about a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Continue with this message (the original or a rewritten one).
    Forward(MessageData),
    /// Drop the message: later interceptors and the transport never see it.
    Suppress,
}

// ============================================================================
// Interceptor
// ============================================================================

type MatchFn<A> = Box<dyn Fn(&MessageData) -> MatchOutcome<A> + Send + Sync>;
type CallbackFn<A> = Box<dyn Fn(MessageData, A) -> BoxFuture<'static, Result<Verdict>> + Send + Sync>;
type StopFn = Box<dyn Fn(&MessageData) -> bool + Send + Sync>;

/// A pipeline registration before it is added to a messenger.
pub struct Interceptor<A = ()> {
    match_condition: MatchFn<A>,
    callback: CallbackFn<A>,
    stop_condition: StopFn,
    timeout: Option<Duration>,
    stop_propagation: bool,
}

impl<A: Send + 'static> Interceptor<A> {
    /// Creates a persistent interceptor (its stop condition is always false).
    pub fn new<M, C, Fut>(match_condition: M, callback: C) -> Self
    where
        M: Fn(&MessageData) -> MatchOutcome<A> + Send + Sync + 'static,
        C: Fn(MessageData, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Verdict>> + Send + 'static,
    {
        Self {
            match_condition: Box::new(match_condition),
            callback: Box::new(move |message, args| Box::pin(callback(message, args))),
            stop_condition: Box::new(|_| false),
            timeout: None,
            stop_propagation: false,
        }
    }

    /// Sets the stop condition. When it returns `true` for a walked message,
    /// the registration is removed after that message.
    #[must_use]
    pub fn stop_when<F>(mut self, stop_condition: F) -> Self
    where
        F: Fn(&MessageData) -> bool + Send + Sync + 'static,
    {
        self.stop_condition = Box::new(stop_condition);
        self
    }

    /// Removes the registration if nothing matched within `timeout`.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Claims matched messages: the walk ends after this interceptor.
    #[inline]
    #[must_use]
    pub fn stop_propagation(mut self) -> Self {
        self.stop_propagation = true;
        self
    }

    /// Returns the expiry window, if any.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<A> std::fmt::Debug for Interceptor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("timeout", &self.timeout)
            .field("stop_propagation", &self.stop_propagation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Stage
// ============================================================================

/// Type-erased interceptor as stored in the pipeline.
pub(crate) trait Stage: Send + Sync {
    /// Runs the match condition; on match, returns the pending callback.
    fn evaluate(&self, message: &MessageData) -> Option<BoxFuture<'static, Result<Verdict>>>;

    /// Runs the stop condition.
    fn should_stop(&self, message: &MessageData) -> bool;

    /// Returns `true` if a match ends the walk.
    fn stops_propagation(&self) -> bool;
}

impl<A: Send + 'static> Stage for Interceptor<A> {
    fn evaluate(&self, message: &MessageData) -> Option<BoxFuture<'static, Result<Verdict>>> {
        match (self.match_condition)(message) {
            MatchOutcome::Matched(args) => Some((self.callback)(message.clone(), args)),
            MatchOutcome::Unmatched => None,
        }
    }

    fn should_stop(&self, message: &MessageData) -> bool {
        (self.stop_condition)(message)
    }

    fn stops_propagation(&self) -> bool {
        self.stop_propagation
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_match_outcome_from_bool_and_option() {
        assert!(MatchOutcome::from_bool(true).is_matched());
        assert!(!MatchOutcome::from_bool(false).is_matched());
        assert_eq!(MatchOutcome::from(Some(3)), MatchOutcome::Matched(3));
        assert_eq!(MatchOutcome::<i32>::from(None), MatchOutcome::Unmatched);
    }

    #[tokio::test]
    async fn test_stage_passes_context_to_callback() {
        let interceptor = Interceptor::new(
            |message: &MessageData| {
                message
                    .payload
                    .get("n")
                    .and_then(serde_json::Value::as_u64)
                    .into()
            },
            |message: MessageData, n: u64| async move {
                Ok(Verdict::Forward(MessageData::new(message.event, json!({ "n": n + 1 }))))
            },
        );

        let matched = interceptor
            .evaluate(&MessageData::new("x", json!({ "n": 41 })))
            .expect("should match");
        assert_eq!(
            matched.await.expect("callback"),
            Verdict::Forward(MessageData::new("x", json!({ "n": 42 })))
        );

        assert!(interceptor.evaluate(&MessageData::new("x", json!({}))).is_none());
    }

    #[test]
    fn test_defaults_and_builders() {
        let interceptor = Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            |message: MessageData, ()| async move { Ok(Verdict::Forward(message)) },
        );
        assert!(!interceptor.should_stop(&MessageData::new("x", json!(null))));
        assert!(!interceptor.stops_propagation());
        assert_eq!(interceptor.timeout(), None);

        let one_shot = interceptor
            .stop_when(|_| true)
            .with_timeout(Duration::from_secs(5))
            .stop_propagation();
        assert!(one_shot.should_stop(&MessageData::new("x", json!(null))));
        assert!(one_shot.stops_propagation());
        assert_eq!(one_shot.timeout(), Some(Duration::from_secs(5)));
    }
}
