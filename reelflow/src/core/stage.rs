//! Stage and provider kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::PipelineState;

/// One externally-processed step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Turns a segment's source text into a voiceover track.
    VoiceSynthesis,
    /// Combines a segment's voiceover with its background media.
    MediaCombination,
    /// Joins all combined segment clips into one video, in sequence order.
    Concatenation,
    /// Adds a generated music track to the concatenated video.
    MusicGeneration,
}

/// Whether a stage operates on a single Segment or on the whole Video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageScope {
    /// Runs once per Segment.
    Segment,
    /// Runs once per Video, gated on aggregate segment readiness.
    Video,
}

/// The external processor backing a stage.
///
/// Three providers serve the four stages: the media provider handles both
/// combination and concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Voice synthesis service.
    Voice,
    /// Media combination / concatenation service.
    Media,
    /// Music generation service.
    Music,
}

impl StageKind {
    /// All stages in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::VoiceSynthesis,
        Self::MediaCombination,
        Self::Concatenation,
        Self::MusicGeneration,
    ];

    /// Returns the scope this stage operates at.
    #[must_use]
    pub fn scope(&self) -> StageScope {
        match self {
            Self::VoiceSynthesis | Self::MediaCombination => StageScope::Segment,
            Self::Concatenation | Self::MusicGeneration => StageScope::Video,
        }
    }

    /// Returns the provider that processes this stage.
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::VoiceSynthesis => ProviderKind::Voice,
            Self::MediaCombination | Self::Concatenation => ProviderKind::Media,
            Self::MusicGeneration => ProviderKind::Music,
        }
    }

    /// The `*_dispatched` state owned by this stage.
    #[must_use]
    pub fn dispatched_state(&self) -> PipelineState {
        match self {
            Self::VoiceSynthesis => PipelineState::VoiceDispatched,
            Self::MediaCombination => PipelineState::MediaDispatched,
            Self::Concatenation => PipelineState::ConcatDispatched,
            Self::MusicGeneration => PipelineState::MusicDispatched,
        }
    }

    /// The `*_done` state entered when this stage's callback succeeds.
    #[must_use]
    pub fn done_state(&self) -> PipelineState {
        match self {
            Self::VoiceSynthesis => PipelineState::VoiceDone,
            Self::MediaCombination => PipelineState::MediaDone,
            Self::Concatenation => PipelineState::ConcatDone,
            Self::MusicGeneration => PipelineState::MusicDone,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoiceSynthesis => write!(f, "voice_synthesis"),
            Self::MediaCombination => write!(f, "media_combination"),
            Self::Concatenation => write!(f, "concatenation"),
            Self::MusicGeneration => write!(f, "music_generation"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voice => write!(f, "voice"),
            Self::Media => write!(f, "media"),
            Self::Music => write!(f, "music"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" => Ok(Self::Voice),
            "media" => Ok(Self::Media),
            "music" => Ok(Self::Music),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}
