//! Wire frame codec for the host application's multiplexed messages.
//!
//! # Format
//!
//! ```text
//! 42["perplexity_ask","what is rust?",{"query_source":"home"}]
//! ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
//! |  JSON array: [event, ...data]
//! message code (ASCII digits)
//! ```
//!
//! Acknowledgement frames carry no event name: `430[{"has_profile":true}]`
//! decodes to code `430`, no event, one data element. A bare code (`2`,
//! `40`) decodes to an envelope with neither event nor data.
//!
//! The same text channel sometimes tunnels plain JSON values after the code
//! (`0{"sid":"..."}`, `42"hello"`). Those decode to [`Frame::Bare`], which
//! interceptors must not treat as an envelope.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

// ============================================================================
// Envelope
// ============================================================================

/// One decoded message of the intercepted wire protocol.
///
/// Envelopes are values: interceptors that rewrite one build a new envelope
/// and re-encode it instead of patching a shared instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Numeric prefix identifying the message category.
    pub message_code: u32,

    /// Operation name, absent for acknowledgement frames.
    pub event: Option<String>,

    /// Positional payload, empty when the frame carried none.
    pub data: Vec<Value>,
}

impl Envelope {
    /// Creates an envelope for a named event.
    #[inline]
    #[must_use]
    pub fn event(message_code: u32, event: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            message_code,
            event: Some(event.into()),
            data,
        }
    }

    /// Creates an acknowledgement envelope (no event name).
    #[inline]
    #[must_use]
    pub fn ack(message_code: u32, data: Vec<Value>) -> Self {
        Self {
            message_code,
            event: None,
            data,
        }
    }

    /// Returns `true` if the envelope carries the given event name.
    #[inline]
    #[must_use]
    pub fn is_event(&self, name: &str) -> bool {
        self.event.as_deref() == Some(name)
    }

    /// Returns the data element at `index` as a JSON object.
    #[inline]
    #[must_use]
    pub fn object_at(&self, index: usize) -> Option<&Map<String, Value>> {
        self.data.get(index).and_then(Value::as_object)
    }

    /// Returns `true` if the text form re-parses to this same envelope.
    ///
    /// An envelope without an event whose first data element is a string is
    /// ambiguous: the string would be read back as the event name.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.event.is_some() || !matches!(self.data.first(), Some(Value::String(_)))
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Everything the parse path can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A multiplexed envelope.
    Envelope(Envelope),

    /// A numeric code followed by a JSON value that is not an array.
    Bare {
        /// Numeric prefix.
        message_code: u32,
        /// The tunnelled value.
        value: Value,
    },
}

impl Frame {
    /// Returns the envelope, if this frame is one.
    #[inline]
    #[must_use]
    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Envelope(envelope) => Some(envelope),
            Self::Bare { .. } => None,
        }
    }

    /// Consumes the frame, returning the envelope if this frame is one.
    #[inline]
    #[must_use]
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Self::Envelope(envelope) => Some(envelope),
            Self::Bare { .. } => None,
        }
    }

    /// Returns the numeric prefix of the frame.
    #[inline]
    #[must_use]
    pub fn message_code(&self) -> u32 {
        match self {
            Self::Envelope(envelope) => envelope.message_code,
            Self::Bare { message_code, .. } => *message_code,
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Decodes a raw frame.
///
/// Returns `None` for anything that does not start with a decimal code or
/// whose remainder is not a single JSON value. Never panics.
#[must_use]
pub fn parse(raw: &str) -> Option<Frame> {
    let digits = raw.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let (code, rest) = raw.split_at(digits);
    let message_code: u32 = code.parse().ok()?;

    if rest.is_empty() {
        return Some(Frame::Envelope(Envelope::ack(message_code, Vec::new())));
    }

    match serde_json::from_str::<Value>(rest).ok()? {
        Value::Array(mut items) => {
            let event = match items.first() {
                Some(Value::String(_)) => match items.remove(0) {
                    Value::String(event) => Some(event),
                    _ => None,
                },
                _ => None,
            };

            Some(Frame::Envelope(Envelope {
                message_code,
                event,
                data: items,
            }))
        }
        value => Some(Frame::Bare {
            message_code,
            value,
        }),
    }
}

/// Encodes an envelope to its text form.
#[must_use]
pub fn stringify(envelope: &Envelope) -> String {
    let mut out = envelope.message_code.to_string();

    if envelope.event.is_none() && envelope.data.is_empty() {
        return out;
    }

    let mut items = Vec::with_capacity(envelope.data.len() + 1);
    if let Some(event) = &envelope.event {
        items.push(Value::String(event.clone()));
    }
    items.extend(envelope.data.iter().cloned());

    out.push_str(&Value::Array(items).to_string());
    out
}

/// Returns `true` if the parse path produced an envelope rather than a
/// tunnelled bare value.
#[inline]
#[must_use]
pub fn is_well_formed_envelope(frame: &Frame) -> bool {
    matches!(frame, Frame::Envelope(_))
}

/// Decodes a raw frame and keeps it only if it is an envelope.
#[inline]
#[must_use]
pub fn parse_envelope(raw: &str) -> Option<Envelope> {
    parse(raw).and_then(Frame::into_envelope)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_event_frame() {
        let frame = parse(r#"42["perplexity_ask","hi",{"query_source":"home"}]"#).expect("parse");
        let envelope = frame.as_envelope().expect("envelope");

        assert_eq!(envelope.message_code, 42);
        assert!(envelope.is_event("perplexity_ask"));
        assert_eq!(envelope.data, vec![json!("hi"), json!({"query_source": "home"})]);
    }

    #[test]
    fn test_parse_ack_frame() {
        let envelope = parse_envelope(r#"430[{"has_profile":true}]"#).expect("envelope");

        assert_eq!(envelope.message_code, 430);
        assert_eq!(envelope.event, None);
        assert_eq!(envelope.data, vec![json!({"has_profile": true})]);
    }

    #[test]
    fn test_parse_bare_code() {
        let envelope = parse_envelope("2").expect("envelope");
        assert_eq!(envelope, Envelope::ack(2, Vec::new()));
        assert_eq!(stringify(&envelope), "2");
    }

    #[test]
    fn test_parse_tunnelled_values_are_bare() {
        let frame = parse(r#"0{"sid":"abc"}"#).expect("parse");
        assert!(!is_well_formed_envelope(&frame));
        assert_eq!(frame.message_code(), 0);

        let frame = parse(r#"42"plain text""#).expect("parse");
        assert_eq!(
            frame,
            Frame::Bare {
                message_code: 42,
                value: json!("plain text")
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_none());
        assert!(parse(r#"["no_code"]"#).is_none());
        assert!(parse("42[unterminated").is_none());
        assert!(parse(r#"42["a"]trailing"#).is_none());
        assert!(parse("99999999999999999999").is_none());
    }

    #[test]
    fn test_stringify_event_frame() {
        let envelope = Envelope::event(42, "get_rate_limit", vec![]);
        assert_eq!(stringify(&envelope), r#"42["get_rate_limit"]"#);
    }

    #[test]
    fn test_stringify_ack_frame() {
        let envelope = Envelope::ack(431, vec![json!([{"uuid": "s1"}])]);
        assert_eq!(stringify(&envelope), r#"431[[{"uuid":"s1"}]]"#);
    }

    #[test]
    fn test_ambiguous_ack_is_not_well_formed() {
        let envelope = Envelope::ack(430, vec![json!("looks like an event")]);
        assert!(!envelope.is_well_formed());
        assert!(Envelope::ack(430, vec![json!(1)]).is_well_formed());
    }

    #[test]
    fn test_object_at() {
        let envelope = Envelope::event(42, "x", vec![json!("q"), json!({"a": 1})]);
        assert!(envelope.object_at(0).is_none());
        assert_eq!(envelope.object_at(1).and_then(|o| o.get("a")), Some(&json!(1)));
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            ".*".prop_map(Value::String),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn envelope() -> impl Strategy<Value = Envelope> {
        (
            any::<u32>(),
            prop::option::of("[a-z_]{1,16}"),
            prop::collection::vec(json_value(), 0..4),
        )
            .prop_map(|(message_code, event, data)| Envelope {
                message_code,
                event,
                data,
            })
            .prop_filter("well-formed", Envelope::is_well_formed)
    }

    proptest! {
        #[test]
        fn prop_round_trip(e in envelope()) {
            let text = stringify(&e);
            prop_assert_eq!(parse(&text), Some(Frame::Envelope(e)));
        }

        #[test]
        fn prop_parse_never_panics(raw in ".*") {
            let _ = parse(&raw);
        }
    }
}
