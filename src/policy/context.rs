//! Collaborators the policies read from and act on.
//!
//! The bridge does not own settings, cached query data or query box state.
//! It sees them through these traits, implemented by the embedding
//! application. In-process implementations are provided for tests and
//! simple embeddings.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::audio::TtsVoice;

// ============================================================================
// Settings
// ============================================================================

/// Which query box selectors are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryBoxSelectors {
    /// The language model selector overrides the model of outgoing queries.
    pub language_model: bool,
    /// The space and focus selector overrides focus and target space.
    pub space_n_focus: bool,
}

/// Snapshot of the user settings the policies consult.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Suppress outgoing analytics events.
    pub block_telemetry: bool,
    /// Enabled selectors.
    pub query_box_selectors: QueryBoxSelectors,
    /// Voice used when none is requested.
    pub default_tts_voice: TtsVoice,
}

/// Source of the current settings.
///
/// Read at match time, so a toggle takes effect on the next message.
pub trait SettingsSource: Send + Sync {
    /// Returns the current settings.
    fn settings(&self) -> Settings;
}

impl SettingsSource for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

impl SettingsSource for RwLock<Settings> {
    fn settings(&self) -> Settings {
        self.read().clone()
    }
}

// ============================================================================
// CacheKey
// ============================================================================

/// Key of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// `["userSettings"]`
    #[must_use]
    pub fn user_settings() -> Self {
        Self::new(["userSettings"])
    }

    /// `["space-files", uuid]`
    #[must_use]
    pub fn space_files(space_uuid: &str) -> Self {
        Self::new(["space-files", space_uuid])
    }

    /// `["threadInfo", slug]`
    #[must_use]
    pub fn thread_info(slug: &str) -> Self {
        Self::new(["threadInfo", slug])
    }

    /// `["spaces"]`
    #[must_use]
    pub fn spaces() -> Self {
        Self::new(["spaces"])
    }

    /// Returns the key parts.
    #[inline]
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if `self` begins with every part of `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

// ============================================================================
// QueryCache
// ============================================================================

/// Cached query data owned by the embedding application.
pub trait QueryCache: Send + Sync {
    /// Returns the cached value under `key`.
    fn get(&self, key: &CacheKey) -> Option<Value>;

    /// Marks cached data stale.
    ///
    /// With `exact`, only `key` itself; otherwise every key it prefixes.
    fn invalidate(&self, key: &CacheKey, exact: bool);
}

/// Reads a cached value into a typed shape. Mismatches read as absent.
pub(crate) fn get_typed<T: DeserializeOwned>(cache: &dyn QueryCache, key: &CacheKey) -> Option<T> {
    cache.get(key).and_then(|value| serde_json::from_value(value).ok())
}

/// In-process [`QueryCache`]. Invalidation removes entries.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<FxHashMap<CacheKey, Value>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`.
    pub fn set(&self, key: CacheKey, value: Value) {
        self.entries.write().insert(key, value);
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn invalidate(&self, key: &CacheKey, exact: bool) {
        let mut entries = self.entries.write();
        if exact {
            entries.remove(key);
        } else {
            entries.retain(|candidate, _| !candidate.starts_with(key));
        }
        trace!(%key, exact, "Cache invalidated");
    }
}

// ============================================================================
// Query box state
// ============================================================================

/// File sources a query box includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInclusion {
    pub include_space_files: bool,
    pub include_org_files: bool,
}

/// State of the query boxes at the time a query leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBoxSnapshot {
    /// Space picked in the selector.
    pub selected_space_uuid: Option<String>,
    /// Model picked in the selector.
    pub selected_language_model: String,
    /// Focus picked in the main query box.
    pub focus_mode: String,
    /// Main (new thread) query box.
    pub main: FileInclusion,
    /// Follow-up query box.
    pub follow_up: FileInclusion,
    /// Slug of the thread currently open, empty on other pages.
    pub thread_slug: String,
}

/// Source of the current query box state.
pub trait QueryBoxState: Send + Sync {
    /// Returns the current state.
    fn snapshot(&self) -> QueryBoxSnapshot;
}

impl QueryBoxState for QueryBoxSnapshot {
    fn snapshot(&self) -> QueryBoxSnapshot {
        self.clone()
    }
}

impl QueryBoxState for RwLock<QueryBoxSnapshot> {
    fn snapshot(&self) -> QueryBoxSnapshot {
        self.read().clone()
    }
}

// ============================================================================
// PolicyContext
// ============================================================================

/// Collaborators shared by every policy.
#[derive(Clone)]
pub struct PolicyContext {
    pub settings: Arc<dyn SettingsSource>,
    pub cache: Arc<dyn QueryCache>,
    pub query_box: Arc<dyn QueryBoxState>,
}

impl PolicyContext {
    /// Bundles the collaborators.
    #[must_use]
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        cache: Arc<dyn QueryCache>,
        query_box: Arc<dyn QueryBoxState>,
    ) -> Self {
        Self {
            settings,
            cache,
            query_box,
        }
    }
}

impl std::fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyContext")
            .field("settings", &self.settings.settings())
            .field("query_box", &self.query_box.snapshot())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
