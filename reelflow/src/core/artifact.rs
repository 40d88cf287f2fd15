//! Media artifact references.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The media content behind a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Audio only (voiceover, music track).
    Audio,
    /// Video only (background footage).
    Video,
    /// Muxed audio and video (combined clips, final output).
    AudioVideo,
}

/// A reference to a media artifact held in external object storage.
///
/// The orchestrator never touches media bytes; it only threads fetchable
/// locations between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Fetchable location (URL or storage key).
    pub location: String,
    /// What the location points at.
    pub kind: MediaKind,
    /// Provider-reported metadata (duration, codec, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MediaRef {
    /// Creates a reference to an audio artifact.
    #[must_use]
    pub fn audio(location: impl Into<String>) -> Self {
        Self::new(location, MediaKind::Audio)
    }

    /// Creates a reference to a video artifact.
    #[must_use]
    pub fn video(location: impl Into<String>) -> Self {
        Self::new(location, MediaKind::Video)
    }

    /// Creates a reference to a muxed audio/video artifact.
    #[must_use]
    pub fn audio_video(location: impl Into<String>) -> Self {
        Self::new(location, MediaKind::AudioVideo)
    }

    /// Creates a reference with an explicit kind.
    #[must_use]
    pub fn new(location: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            location: location.into(),
            kind,
            metadata: HashMap::new(),
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the location is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.location.trim().is_empty()
    }
}
