//! Traffic shaping policies: telemetry suppression, complexity flag
//! stripping and debug inspection.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::{debug, trace};

use crate::messenger::{Interceptor, InterceptorHandle, MatchOutcome, Messenger, Verdict};
use crate::protocol::{Envelope, LONG_POLLING_EVENT, MessageData, WEB_SOCKET_EVENT, parse_structured_message};

use super::context::PolicyContext;

// ============================================================================
// Constants
// ============================================================================

const TELEMETRY_EVENT: &str = "analytics_event";

const COMPLEXITY_KEY: &str = "is_complexity";

// ============================================================================
// Telemetry
// ============================================================================

/// Suppresses analytics events while the `block_telemetry` setting is on.
///
/// The setting is read per message.
pub fn block_telemetry(messenger: &Messenger, context: &PolicyContext) -> InterceptorHandle {
    let settings = context.settings.clone();

    messenger.add_interceptor(Interceptor::new(
        move |message: &MessageData| {
            MatchOutcome::from_bool(
                settings.settings().block_telemetry
                    && parse_structured_message(message).is_some_and(|e| e.is_event(TELEMETRY_EVENT)),
            )
        },
        |_: MessageData, ()| async {
            trace!("Analytics event suppressed");
            Ok(Verdict::Suppress)
        },
    ))
}

// ============================================================================
// Complexity flag
// ============================================================================

/// Loose truthiness of a JSON flag: `false`, `0`, `""` and `null` are off.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Returns the envelope without the complexity flag if it was set.
#[must_use]
pub fn strip_complexity(envelope: &Envelope) -> Option<Envelope> {
    let flagged = envelope
        .object_at(0)
        .and_then(|object| object.get(COMPLEXITY_KEY))
        .is_some_and(is_truthy);

    if !flagged {
        return None;
    }

    let mut stripped = envelope.clone();
    if let Some(Value::Object(object)) = stripped.data.first_mut() {
        object.remove(COMPLEXITY_KEY);
    }
    Some(stripped)
}

/// Removes the extension's complexity marker before the host sees it.
pub fn remove_complexity_identifier(messenger: &Messenger) -> InterceptorHandle {
    messenger.add_interceptor(Interceptor::new(
        |message: &MessageData| {
            parse_structured_message(message)
                .and_then(|envelope| strip_complexity(&envelope))
                .into()
        },
        |message: MessageData, stripped: Envelope| async move {
            Ok(Verdict::Forward(message.with_envelope(&stripped)))
        },
    ))
}

// ============================================================================
// Inspection
// ============================================================================

/// Logs every forwarded WebSocket frame at debug level.
pub fn inspect_web_socket_events(messenger: &Messenger) -> InterceptorHandle {
    messenger.add_interceptor(Interceptor::new(
        |message: &MessageData| MatchOutcome::from_bool(message.event == WEB_SOCKET_EVENT),
        |message: MessageData, ()| async move {
            debug!(frame = ?message.frame_text(), "web socket");
            Ok(Verdict::Forward(message))
        },
    ))
}

/// Logs every forwarded long-polling frame at debug level.
pub fn inspect_long_polling_events(messenger: &Messenger) -> InterceptorHandle {
    messenger.add_interceptor(Interceptor::new(
        |message: &MessageData| MatchOutcome::from_bool(message.event == LONG_POLLING_EVENT),
        |message: MessageData, ()| async move {
            debug!(payload = %message.payload, "long polling");
            Ok(Verdict::Forward(message))
        },
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::RwLock;
    use serde_json::json;

    use crate::policy::context::{MemoryCache, QueryBoxSnapshot, Settings};
    use crate::transport::Channel;

    fn messenger() -> Messenger {
        let (ours, _theirs) = Channel::pair();
        Messenger::new(ours)
    }

    #[tokio::test]
    async fn test_telemetry_suppressed_only_while_enabled() {
        let messenger = messenger();
        let settings = Arc::new(RwLock::new(Settings {
            block_telemetry: true,
            ..Settings::default()
        }));
        let context = PolicyContext::new(
            settings.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(QueryBoxSnapshot::default()),
        );

        block_telemetry(&messenger, &context);

        let analytics = MessageData::web_socket("send", r#"42["analytics_event",{"name":"click"}]"#);
        assert_eq!(messenger.intercept(analytics.clone()).await, None);

        let other = MessageData::web_socket("send", r#"42["perplexity_ask","q",{}]"#);
        assert_eq!(messenger.intercept(other.clone()).await, Some(other));

        settings.write().block_telemetry = false;
        assert_eq!(messenger.intercept(analytics.clone()).await, Some(analytics));
    }

    #[test]
    fn test_strip_complexity() {
        let flagged = Envelope::event(42, "perplexity_ask", vec![json!({"is_complexity": true, "q": 1})]);
        let stripped = strip_complexity(&flagged).expect("stripped");
        assert_eq!(stripped.data[0], json!({"q": 1}));

        let unflagged = Envelope::event(42, "perplexity_ask", vec![json!({"is_complexity": false})]);
        assert!(strip_complexity(&unflagged).is_none());

        let absent = Envelope::event(42, "perplexity_ask", vec![json!("text")]);
        assert!(strip_complexity(&absent).is_none());
    }

    #[tokio::test]
    async fn test_remove_complexity_identifier_rewrites_frame() {
        let messenger = messenger();
        remove_complexity_identifier(&messenger);

        let survived = messenger
            .intercept(MessageData::web_socket(
                "send",
                r#"42["perplexity_ask",{"is_complexity":1,"version":"2.13"}]"#,
            ))
            .await
            .expect("forwarded");

        assert_eq!(
            survived.frame_text(),
            Some(r#"42["perplexity_ask",{"version":"2.13"}]"#)
        );
        assert_eq!(survived.payload["event"], "send");
    }

    #[tokio::test]
    async fn test_inspection_forwards_unchanged() {
        let messenger = messenger();
        inspect_web_socket_events(&messenger);
        inspect_long_polling_events(&messenger);

        let ws = MessageData::web_socket("message", "3");
        let lp = MessageData::long_polling("message", r#"42["x"]"#);

        assert_eq!(messenger.intercept(ws.clone()).await, Some(ws));
        assert_eq!(messenger.intercept(lp.clone()).await, Some(lp));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(2)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }
}
