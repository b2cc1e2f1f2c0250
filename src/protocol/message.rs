//! Cross-context message types.
//!
//! Defines the unit exchanged between the sandbox and the page context and
//! the frames that carry it over a [`Channel`](crate::transport::Channel).

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::identifiers::RequestId;

use super::envelope::{self, Envelope};

// ============================================================================
// Constants
// ============================================================================

/// Event name of a forwarded WebSocket frame.
pub const WEB_SOCKET_EVENT: &str = "webSocketEvent";

/// Event name of a forwarded long-polling frame.
pub const LONG_POLLING_EVENT: &str = "longPollingEvent";

// ============================================================================
// MessageData
// ============================================================================

/// A cross-context message.
///
/// For forwarded transport traffic the payload has the shape
/// `{ "event": "send" | "message", "payload": "<raw frame>" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Requested action or forwarded event class.
    pub event: String,

    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
}

impl MessageData {
    /// Creates a new message.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Creates a forwarded WebSocket frame message.
    #[inline]
    #[must_use]
    pub fn web_socket(direction: &str, frame: impl Into<String>) -> Self {
        Self::new(
            WEB_SOCKET_EVENT,
            json!({ "event": direction, "payload": frame.into() }),
        )
    }

    /// Creates a forwarded long-polling frame message.
    #[inline]
    #[must_use]
    pub fn long_polling(direction: &str, frame: impl Into<String>) -> Self {
        Self::new(
            LONG_POLLING_EVENT,
            json!({ "event": direction, "payload": frame.into() }),
        )
    }

    /// Returns `true` if this message carries forwarded transport traffic.
    #[inline]
    #[must_use]
    pub fn is_transport_event(&self) -> bool {
        self.event == WEB_SOCKET_EVENT || self.event == LONG_POLLING_EVENT
    }

    /// Returns the raw frame text of a forwarded transport message.
    #[inline]
    #[must_use]
    pub fn frame_text(&self) -> Option<&str> {
        self.payload.get("payload").and_then(Value::as_str)
    }

    /// Returns a new message whose frame text is replaced.
    ///
    /// Every other payload field is preserved.
    #[must_use]
    pub fn with_frame_text(&self, frame: impl Into<String>) -> Self {
        let mut payload = match &self.payload {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        payload.insert("payload".to_string(), Value::String(frame.into()));

        Self {
            event: self.event.clone(),
            payload: Value::Object(payload),
        }
    }

    /// Returns a new message carrying the encoded envelope as frame text.
    #[inline]
    #[must_use]
    pub fn with_envelope(&self, envelope: &Envelope) -> Self {
        self.with_frame_text(envelope::stringify(envelope))
    }
}

/// Decodes the frame text of a message, keeping only envelopes.
///
/// Messages without frame text, undecodable frames and tunnelled bare values
/// all yield `None`.
#[inline]
#[must_use]
pub fn parse_structured_message(message: &MessageData) -> Option<Envelope> {
    message.frame_text().and_then(envelope::parse_envelope)
}

// ============================================================================
// BridgeFrame
// ============================================================================

/// A frame on the cross-context channel.
///
/// # Format
///
/// Request:
/// ```json
/// {
///   "type": "request",
///   "id": "uuid",
///   "event": "getReactNodeData",
///   "payload": { ... },
///   "awaitResponse": true
/// }
/// ```
///
/// Response:
/// ```json
/// {
///   "type": "response",
///   "id": "uuid",
///   "payload": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeFrame {
    /// A message that may expect a response.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Event name.
        event: String,
        /// Payload.
        #[serde(default)]
        payload: Value,
        /// Whether the sender waits for a response.
        #[serde(rename = "awaitResponse", default)]
        await_response: bool,
    },

    /// The answer to a request.
    Response {
        /// Correlation id of the request.
        id: RequestId,
        /// Result value, `null` when the message was suppressed.
        #[serde(default)]
        payload: Value,
    },
}

impl BridgeFrame {
    /// Creates a request frame with a fresh correlation id.
    #[inline]
    #[must_use]
    pub fn request(message: MessageData, await_response: bool) -> Self {
        Self::Request {
            id: RequestId::generate(),
            event: message.event,
            payload: message.payload,
            await_response,
        }
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => *id,
        }
    }
}

// ============================================================================
// PageAction
// ============================================================================

/// Event name of page inspection requests.
pub const PAGE_ACTION_EVENT: &str = "getReactNodeData";

/// An inspection the page context runs on behalf of the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageAction {
    /// Resolve the backend uuid of a rendered thread message.
    GetMessageBackendUuid {
        /// Selector of the message block element.
        #[serde(rename = "querySelector")]
        query_selector: String,
    },
}

impl PageAction {
    /// Converts the action into a request message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the action cannot be serialized.
    pub fn into_message(self) -> crate::Result<MessageData> {
        Ok(MessageData::new(PAGE_ACTION_EVENT, serde_json::to_value(self)?))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_text_roundtrip() {
        let message = MessageData::web_socket("send", r#"42["perplexity_ask"]"#);
        assert!(message.is_transport_event());
        assert_eq!(message.frame_text(), Some(r#"42["perplexity_ask"]"#));

        let rewritten = message.with_frame_text(r#"42["other"]"#);
        assert_eq!(rewritten.frame_text(), Some(r#"42["other"]"#));
        assert_eq!(rewritten.payload["event"], "send");
        assert_eq!(message.frame_text(), Some(r#"42["perplexity_ask"]"#));
    }

    #[test]
    fn test_parse_structured_message() {
        let message = MessageData::long_polling("message", r#"42["get_rate_limit"]"#);
        let envelope = parse_structured_message(&message).expect("envelope");
        assert!(envelope.is_event("get_rate_limit"));

        let bare = MessageData::web_socket("message", r#"0{"sid":"x"}"#);
        assert!(parse_structured_message(&bare).is_none());

        let other = MessageData::new("getReactNodeData", json!({"action": "x"}));
        assert!(parse_structured_message(&other).is_none());
    }

    #[test]
    fn test_request_frame_serialization() {
        let frame = BridgeFrame::request(MessageData::new("ping", json!({"n": 1})), true);
        let json = serde_json::to_value(&frame).expect("serialize");

        assert_eq!(json["type"], "request");
        assert_eq!(json["event"], "ping");
        assert_eq!(json["awaitResponse"], true);
        assert_eq!(json["id"], frame.id().to_string());
    }

    #[test]
    fn test_response_frame_parsing() {
        let json_str = r#"{
            "type": "response",
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "payload": "abc-uuid"
        }"#;

        let frame: BridgeFrame = serde_json::from_str(json_str).expect("parse");
        match frame {
            BridgeFrame::Response { payload, .. } => assert_eq!(payload, "abc-uuid"),
            other => panic!("Expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_request_defaults() {
        let json_str = r#"{
            "type": "request",
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "event": "webSocketEvent"
        }"#;

        let frame: BridgeFrame = serde_json::from_str(json_str).expect("parse");
        assert!(matches!(
            frame,
            BridgeFrame::Request { await_response: false, payload: Value::Null, .. }
        ));
    }

    #[test]
    fn test_page_action_message() {
        let message = PageAction::GetMessageBackendUuid {
            query_selector: "div[data-index=\"3\"]".to_string(),
        }
        .into_message()
        .expect("message");

        assert_eq!(message.event, PAGE_ACTION_EVENT);
        assert_eq!(message.payload["action"], "getMessageBackendUuid");
        assert_eq!(message.payload["querySelector"], "div[data-index=\"3\"]");
    }
}
