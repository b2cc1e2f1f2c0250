//! Transport-level packet framing beneath the envelope.
//!
//! Every text frame on the raw socket starts with one packet-type digit:
//!
//! | Digit | Packet | Payload |
//! |-------|--------|---------|
//! | `0` | Open | `{"sid":"...","pingInterval":..}` |
//! | `1` | Close | - |
//! | `2` | Ping | optional probe |
//! | `3` | Pong | optional probe |
//! | `4` | Message | an envelope, e.g. `2["voice_over",{...}]` |
//! | `5` | Upgrade | - |
//! | `6` | Noop | - |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

// ============================================================================
// PacketKind
// ============================================================================

/// Packet type carried by the first character of a text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Server acknowledgement of a new connection.
    Open,
    /// Connection close request.
    Close,
    /// Heartbeat probe.
    Ping,
    /// Heartbeat answer.
    Pong,
    /// Application message.
    Message,
    /// Transport upgrade.
    Upgrade,
    /// No operation.
    Noop,
}

impl PacketKind {
    /// Returns the wire digit for this packet type.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }

    /// Parses a wire digit.
    #[inline]
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '2' => Some(Self::Ping),
            '3' => Some(Self::Pong),
            '4' => Some(Self::Message),
            '5' => Some(Self::Upgrade),
            '6' => Some(Self::Noop),
            _ => None,
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A decoded text packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Packet type.
    pub kind: PacketKind,
    /// Everything after the type digit.
    pub data: &'a str,
}

impl<'a> Packet<'a> {
    /// Decodes a text frame. Returns `None` for an empty frame or an
    /// unknown type digit.
    #[must_use]
    pub fn decode(raw: &'a str) -> Option<Self> {
        let mut chars = raw.chars();
        let kind = PacketKind::from_char(chars.next()?)?;
        Some(Self {
            kind,
            data: chars.as_str(),
        })
    }

    /// Returns the session id if this is an open packet carrying one.
    #[must_use]
    pub fn open_sid(&self) -> Option<String> {
        if self.kind != PacketKind::Open {
            return None;
        }
        serde_json::from_str::<OpenPayload>(self.data)
            .ok()
            .map(|open| open.sid)
            .filter(|sid| !sid.is_empty())
    }
}

/// Encodes a packet of the given kind.
#[inline]
#[must_use]
pub fn encode(kind: PacketKind, data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 1);
    out.push(kind.as_char());
    out.push_str(data);
    out
}

// ============================================================================
// OpenPayload
// ============================================================================

/// Body of the open packet. Only the session id is needed.
#[derive(Debug, Deserialize)]
struct OpenPayload {
    sid: String,
}

// ============================================================================
// Tests
// ============================================================================
