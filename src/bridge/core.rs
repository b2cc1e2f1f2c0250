//! Bridge context.
//!
//! Owns the messenger and, once first used, the socket registry and the
//! text-to-speech player. Dropping the bridge or calling
//! [`Bridge::shutdown`] tears them down.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, OnceLock};

use tracing::{debug, info};
use url::Url;

use crate::audio::{AudioSink, TtsPlayer, TtsVoice};
use crate::error::{Error, Result};
use crate::messenger::{InterceptorHandle, Messenger};
use crate::policy::{self, PolicyContext};
use crate::protocol::PageAction;
use crate::transport::{Channel, SocketRegistry};

use super::builder::BridgeBuilder;
use super::options::BridgeOptions;

// ============================================================================
// Bridge
// ============================================================================

/// The sandbox side of the extension.
///
/// # Example
///
/// ```ignore
/// let bridge = Bridge::builder()
///     .settings(settings)
///     .query_box(query_box)
///     .audio_sink(sink)
///     .build(channel)?;
///
/// bridge.install_default_policies();
/// bridge.speak_message(2, None).await?;
/// ```
pub struct Bridge {
    /// Messenger to the page context.
    messenger: Messenger,
    /// Collaborators shared by the policies.
    context: PolicyContext,
    /// Sink voice-overs play into.
    audio_sink: Option<Arc<dyn AudioSink>>,
    /// Validated options.
    options: BridgeOptions,
    /// Resolved host endpoint.
    endpoint: Url,
    /// Socket registry, built on first use.
    sockets: OnceLock<Arc<SocketRegistry>>,
    /// Voice-over player, built on first use.
    tts: OnceLock<Arc<TtsPlayer>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("messenger", &self.messenger)
            .field("options", &self.options)
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Constructor
// ============================================================================

impl Bridge {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Creates a bridge from validated parts.
    pub(crate) fn new(
        channel: Channel,
        context: PolicyContext,
        audio_sink: Option<Arc<dyn AudioSink>>,
        options: BridgeOptions,
        endpoint: Url,
    ) -> Self {
        let messenger = Messenger::with_default_timeout(channel, options.request_timeout);

        debug!(%endpoint, "Bridge created");

        Self {
            messenger,
            context,
            audio_sink,
            options,
            endpoint,
            sockets: OnceLock::new(),
            tts: OnceLock::new(),
        }
    }
}

// ============================================================================
// Bridge - Accessors
// ============================================================================

impl Bridge {
    /// Returns the messenger.
    #[inline]
    #[must_use]
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Returns the policy collaborators.
    #[inline]
    #[must_use]
    pub fn policy_context(&self) -> &PolicyContext {
        &self.context
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Returns the socket registry, creating it on first call.
    pub fn sockets(&self) -> Arc<SocketRegistry> {
        Arc::clone(self.sockets.get_or_init(|| {
            debug!("Socket registry created");
            Arc::new(SocketRegistry::new(
                self.endpoint.clone(),
                self.options.handshake_timeout,
            ))
        }))
    }

    /// Returns the voice-over player, creating it on first call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the bridge was built without an audio sink.
    pub fn tts(&self) -> Result<Arc<TtsPlayer>> {
        if let Some(player) = self.tts.get() {
            return Ok(Arc::clone(player));
        }

        let sink = self.audio_sink.clone().ok_or_else(|| {
            Error::config("Audio sink is required for voice-overs. Use .audio_sink() to set it.")
        })?;

        Ok(Arc::clone(self.tts.get_or_init(|| {
            debug!("Voice-over player created");
            Arc::new(TtsPlayer::new(self.sockets(), sink, self.options.tts_idle_timeout))
        })))
    }
}

// ============================================================================
// Bridge - Policies
// ============================================================================

impl Bridge {
    /// Registers the persistent policies on the messenger.
    pub fn install_default_policies(&self) -> Vec<InterceptorHandle> {
        policy::install_default_policies(&self.messenger, &self.context)
    }

    /// Overrides the model (and optionally pro search) of the next query.
    pub fn alter_next_query(&self, model: Option<String>, pro_search: bool) -> InterceptorHandle {
        policy::alter_next_query(&self.messenger, model, pro_search)
    }
}

// ============================================================================
// Bridge - Voice-over
// ============================================================================

impl Bridge {
    /// Reads the thread message at `message_index` aloud.
    ///
    /// Without a voice, the settings' default voice is used.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if there is no audio sink
    /// - [`Error::RequestTimeout`] if the page does not answer in time
    /// - [`Error::NotFound`] if the page has no uuid for the message
    /// - Handshake errors from the socket registry
    pub async fn speak_message(&self, message_index: usize, voice: Option<TtsVoice>) -> Result<()> {
        let player = self.tts()?;
        let voice = voice.unwrap_or_else(|| self.context.settings.settings().default_tts_voice);

        let action = PageAction::GetMessageBackendUuid {
            query_selector: self.options.message_selector(message_index),
        };
        let reply = self
            .messenger
            .run_page_action(action, self.options.page_action_timeout)
            .await?;

        let uuid = reply
            .as_str()
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| Error::not_found(format!("backend uuid of message {message_index}")))?;

        info!(message_index, %voice, "Speaking message");
        player.play(uuid, voice).await
    }

    /// Stops the current voice-over, if any.
    pub fn stop_speaking(&self) {
        if let Some(player) = self.tts.get() {
            player.stop();
        }
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Stops playback, closes every socket and stops the messenger.
    pub fn shutdown(&self) {
        self.stop_speaking();

        if let Some(sockets) = self.sockets.get() {
            sockets.close_all();
        }

        self.messenger.shutdown();
        debug!("Bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
