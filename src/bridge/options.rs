//! Bridge configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use cplx_bridge::BridgeOptions;
//!
//! let options = BridgeOptions::new()
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_message_block_selector("div.message-block");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::audio::tts::DEFAULT_IDLE_TIMEOUT;
use crate::error::{Error, Result};
use crate::messenger::DEFAULT_REQUEST_TIMEOUT;

// ============================================================================
// Constants
// ============================================================================

/// Host endpoint handshakes connect to when none is configured.
pub const DEFAULT_SOCKET_ENDPOINT: &str =
    "wss://www.perplexity.ai/socket.io/?EIO=4&transport=websocket";

/// Selector of a rendered thread message block.
pub const DEFAULT_MESSAGE_BLOCK_SELECTOR: &str = "div.message-block";

/// Default bound for a socket handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of the message uuid lookup before a voice-over.
const DEFAULT_PAGE_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// BridgeOptions
// ============================================================================

/// Timeouts and endpoints of a [`Bridge`](super::Bridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Default timeout of [`Messenger::send_message`](crate::Messenger::send_message).
    pub request_timeout: Duration,

    /// Timeout of a page inspection request.
    pub page_action_timeout: Duration,

    /// Bound for connect + open packet.
    pub handshake_timeout: Duration,

    /// Time without audio before a voice-over stops listening.
    pub tts_idle_timeout: Duration,

    /// Host endpoint; `None` uses [`DEFAULT_SOCKET_ENDPOINT`].
    pub socket_endpoint: Option<Url>,

    /// Selector of a rendered thread message block.
    pub message_block_selector: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeOptions {
    /// Creates options with the default timeouts and endpoint.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_action_timeout: DEFAULT_PAGE_ACTION_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            tts_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            socket_endpoint: None,
            message_block_selector: String::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeOptions {
    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the page inspection timeout.
    #[inline]
    #[must_use]
    pub fn with_page_action_timeout(mut self, timeout: Duration) -> Self {
        self.page_action_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the voice-over idle timeout.
    #[inline]
    #[must_use]
    pub fn with_tts_idle_timeout(mut self, timeout: Duration) -> Self {
        self.tts_idle_timeout = timeout;
        self
    }

    /// Sets the host endpoint.
    #[inline]
    #[must_use]
    pub fn with_socket_endpoint(mut self, endpoint: Url) -> Self {
        self.socket_endpoint = Some(endpoint);
        self
    }

    /// Sets the message block selector.
    #[inline]
    #[must_use]
    pub fn with_message_block_selector(mut self, selector: impl Into<String>) -> Self {
        self.message_block_selector = selector.into();
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BridgeOptions {
    /// Returns the configured endpoint or the default one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the default endpoint fails to parse.
    pub fn endpoint(&self) -> Result<Url> {
        match &self.socket_endpoint {
            Some(url) => Ok(url.clone()),
            None => Ok(Url::parse(DEFAULT_SOCKET_ENDPOINT)?),
        }
    }

    /// Returns the selector of the message block at `index`.
    #[must_use]
    pub fn message_selector(&self, index: usize) -> String {
        let block = if self.message_block_selector.is_empty() {
            DEFAULT_MESSAGE_BLOCK_SELECTOR
        } else {
            self.message_block_selector.as_str()
        };
        format!("{block}[data-index=\"{index}\"]")
    }

    /// Checks every timeout is non-zero and the endpoint is a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("request_timeout", self.request_timeout),
            ("page_action_timeout", self.page_action_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("tts_idle_timeout", self.tts_idle_timeout),
        ];

        if let Some((name, _)) = timeouts.iter().find(|(_, timeout)| timeout.is_zero()) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        let endpoint = self.endpoint()?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "socket_endpoint must use ws or wss, got: {endpoint}"
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
