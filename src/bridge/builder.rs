//! Builder pattern for bridge configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cplx_bridge::{Bridge, Channel, QueryBoxSnapshot, Settings};
//!
//! let (sandbox, page) = Channel::pair();
//!
//! let bridge = Bridge::builder()
//!     .settings(Arc::new(Settings::default()))
//!     .query_box(Arc::new(QueryBoxSnapshot::default()))
//!     .build(sandbox)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::audio::AudioSink;
use crate::error::{Error, Result};
use crate::policy::{MemoryCache, PolicyContext, QueryBoxState, QueryCache, SettingsSource};
use crate::transport::Channel;

use super::core::Bridge;
use super::options::BridgeOptions;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`] instance.
///
/// Use [`Bridge::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct BridgeBuilder {
    /// Settings source.
    settings: Option<Arc<dyn SettingsSource>>,
    /// Query cache; an in-process cache when unset.
    cache: Option<Arc<dyn QueryCache>>,
    /// Query box state.
    query_box: Option<Arc<dyn QueryBoxState>>,
    /// Audio sink for voice-overs.
    audio_sink: Option<Arc<dyn AudioSink>>,
    /// Timeouts and endpoints.
    options: BridgeOptions,
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("settings", &self.settings.is_some())
            .field("cache", &self.cache.is_some())
            .field("query_box", &self.query_box.is_some())
            .field("audio_sink", &self.audio_sink.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settings source.
    #[inline]
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the query cache.
    #[inline]
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the query box state source.
    #[inline]
    #[must_use]
    pub fn query_box(mut self, query_box: Arc<dyn QueryBoxState>) -> Self {
        self.query_box = Some(query_box);
        self
    }

    /// Sets the audio sink. Without one, voice-overs are unavailable.
    #[inline]
    #[must_use]
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    /// Sets the options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the bridge over `channel`.
    ///
    /// Must be called inside a tokio runtime: the messenger's event loop is
    /// spawned here.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if settings or query box state are not set
    /// - [`Error::Config`] if an option is invalid
    pub fn build(self, channel: Channel) -> Result<Bridge> {
        self.options.validate()?;
        let endpoint = self.options.endpoint()?;

        let settings = self.settings.ok_or_else(|| {
            Error::config(
                "Settings source is required. Use .settings() to set it.\n\
                 Example: Bridge::builder().settings(Arc::new(Settings::default()))",
            )
        })?;

        let query_box = self.query_box.ok_or_else(|| {
            Error::config(
                "Query box state is required. Use .query_box() to set it.\n\
                 Example: Bridge::builder().query_box(Arc::new(QueryBoxSnapshot::default()))",
            )
        })?;

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn QueryCache>);

        let context = PolicyContext::new(settings, cache, query_box);

        Ok(Bridge::new(channel, context, self.audio_sink, self.options, endpoint))
    }
}

// ============================================================================
// Tests
// ============================================================================
