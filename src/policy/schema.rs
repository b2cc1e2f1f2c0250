//! Typed shapes of host payloads the policies read.
//!
//! A payload that fails to deserialize is treated as "not this message",
//! never as an error.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// UserAiProfile
// ============================================================================

/// The user's AI profile, pushed in a `430` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAiProfile {
    /// Whether a profile exists.
    pub has_profile: bool,
    /// Whether the profile is switched off.
    pub disabled: bool,
    /// Free-text introduction.
    #[serde(default)]
    pub bio: Option<String>,
    /// Free-text location.
    #[serde(default)]
    pub location: Option<String>,
    /// Preferred response language.
    #[serde(default)]
    pub language: Option<String>,
}

// ============================================================================
// Space
// ============================================================================

/// A space (collection), pushed in a `431` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
}

// ============================================================================
// Cached query data
// ============================================================================

/// Cached `["space-files", uuid]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpaceFiles {
    #[serde(default)]
    pub files: Vec<Value>,
}

impl SpaceFiles {
    /// Returns `true` if the space has at least one file.
    #[inline]
    #[must_use]
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}

/// Space reference of a thread message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionInfo {
    pub uuid: String,
}

/// One entry of the cached `["threadInfo", slug]` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadMessage {
    #[serde(default)]
    pub collection_info: Option<CollectionInfo>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_user_ai_profile_requires_flags() {
        let profile: UserAiProfile =
            serde_json::from_value(json!({"has_profile": true, "disabled": false, "bio": "hi"}))
                .expect("valid");
        assert_eq!(profile.bio.as_deref(), Some("hi"));

        assert!(serde_json::from_value::<UserAiProfile>(json!({"bio": "hi"})).is_err());
    }

    #[test]
    fn test_space_requires_uuid_and_title() {
        let spaces: Vec<Space> = serde_json::from_value(json!([
            {"uuid": "s-1", "title": "Research", "emoji": null, "extra": 1}
        ]))
        .expect("valid");
        assert_eq!(spaces[0].uuid, "s-1");

        assert!(serde_json::from_value::<Space>(json!({"uuid": "s-1"})).is_err());
    }

    #[test]
    fn test_thread_message_collection_info() {
        let messages: Vec<ThreadMessage> = serde_json::from_value(json!([
            {"collection_info": {"uuid": "c-1", "title": "x"}},
            {}
        ]))
        .expect("valid");

        assert_eq!(messages[0].collection_info.as_ref().map(|c| c.uuid.as_str()), Some("c-1"));
        assert!(messages[1].collection_info.is_none());
    }

    #[test]
    fn test_space_files() {
        let files: SpaceFiles = serde_json::from_value(json!({"files": [{"name": "a.pdf"}]}))
            .expect("valid");
        assert!(files.has_files());

        let empty: SpaceFiles = serde_json::from_value(json!({})).expect("valid");
        assert!(!empty.has_files());
    }
}
