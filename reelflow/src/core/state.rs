//! The pipeline state machine.
//!
//! Shared vocabulary of states, transitions and terminal conditions used by
//! both the scheduler and the webhook correlator, plus the aggregation rule
//! that gates video-scoped stages on segment readiness.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::stage::{StageKind, StageScope};
use crate::errors::InvariantViolation;

/// Which kind of entity a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A whole video (script-level unit of work).
    Video,
    /// One segment of a video.
    Segment,
}

/// Pipeline position of a Video or Segment.
///
/// Segments move through `created → voice_dispatched → voice_done →
/// media_dispatched → media_done`. Videos move through `created →
/// concat_dispatched → concat_done → music_dispatched → music_done` once
/// every segment has reached `media_done`. Any state may instead move to
/// `failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Initial state for both entity kinds.
    Created,
    /// Voice synthesis request in flight.
    VoiceDispatched,
    /// Voiceover produced.
    VoiceDone,
    /// Media combination request in flight.
    MediaDispatched,
    /// Combined segment clip produced; terminal for segments.
    MediaDone,
    /// Concatenation request in flight.
    ConcatDispatched,
    /// Concatenated video produced.
    ConcatDone,
    /// Music generation request in flight.
    MusicDispatched,
    /// Final video produced; terminal for videos.
    MusicDone,
    /// Terminal failure; see the entity's [`FailureReason`].
    Failed,
}

/// Coarse status derived from the pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Not yet dispatched anywhere.
    Pending,
    /// At least one stage dispatched, none terminal.
    Running,
    /// All stages for this entity kind succeeded.
    Complete,
    /// Terminally failed.
    Failed,
}

/// Reason code recorded when an entity transitions to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No callback arrived within the deadline, retry budget exhausted.
    StageTimeout,
    /// The provider's callback explicitly reported failure.
    ProviderFailure,
    /// Dispatch to the provider kept failing, retry budget exhausted.
    DispatchFailed,
    /// A child segment failed, cascading to the parent video.
    SegmentFailed,
    /// Externally cancelled.
    Cancelled,
}

impl PipelineState {
    /// Ordering rank used by [`PipelineState::at_or_past`]. `Failed` has no
    /// rank because a failed entity never satisfies an aggregate gate.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Created => Some(0),
            Self::VoiceDispatched => Some(1),
            Self::VoiceDone => Some(2),
            Self::MediaDispatched => Some(3),
            Self::MediaDone => Some(4),
            Self::ConcatDispatched => Some(5),
            Self::ConcatDone => Some(6),
            Self::MusicDispatched => Some(7),
            Self::MusicDone => Some(8),
            Self::Failed => None,
        }
    }

    /// The stage that owns this state when it is a `*_dispatched` state.
    #[must_use]
    pub fn live_stage(&self) -> Option<StageKind> {
        match self {
            Self::VoiceDispatched => Some(StageKind::VoiceSynthesis),
            Self::MediaDispatched => Some(StageKind::MediaCombination),
            Self::ConcatDispatched => Some(StageKind::Concatenation),
            Self::MusicDispatched => Some(StageKind::MusicGeneration),
            _ => None,
        }
    }

    /// The next stage to dispatch from this state, if any.
    ///
    /// Returns `None` for dispatched states (a stage is already in flight),
    /// terminal states, and states that do not belong to the entity kind.
    #[must_use]
    pub fn next_stage(&self, kind: EntityKind) -> Option<StageKind> {
        match (kind, self) {
            (EntityKind::Segment, Self::Created) => Some(StageKind::VoiceSynthesis),
            (EntityKind::Segment, Self::VoiceDone) => Some(StageKind::MediaCombination),
            (EntityKind::Video, Self::Created) => Some(StageKind::Concatenation),
            (EntityKind::Video, Self::ConcatDone) => Some(StageKind::MusicGeneration),
            _ => None,
        }
    }

    /// Whether this state is terminal for the given entity kind.
    #[must_use]
    pub fn is_terminal(&self, kind: EntityKind) -> bool {
        match self {
            Self::Failed => true,
            Self::MediaDone => kind == EntityKind::Segment,
            Self::MusicDone => kind == EntityKind::Video,
            _ => false,
        }
    }

    /// Whether this state is at or past the completion of `stage`.
    ///
    /// Used by the aggregation rule; a `Failed` state never qualifies.
    #[must_use]
    pub fn at_or_past(&self, stage: StageKind) -> bool {
        match (self.rank(), stage.done_state().rank()) {
            (Some(current), Some(gate)) => current >= gate,
            _ => false,
        }
    }

    /// Derives the coarse status for the given entity kind.
    #[must_use]
    pub fn status_for(&self, kind: EntityKind) -> EntityStatus {
        match self {
            Self::Created => EntityStatus::Pending,
            Self::Failed => EntityStatus::Failed,
            state if state.is_terminal(kind) => EntityStatus::Complete,
            _ => EntityStatus::Running,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::VoiceDispatched => "voice_dispatched",
            Self::VoiceDone => "voice_done",
            Self::MediaDispatched => "media_dispatched",
            Self::MediaDone => "media_done",
            Self::ConcatDispatched => "concat_dispatched",
            Self::ConcatDone => "concat_done",
            Self::MusicDispatched => "music_dispatched",
            Self::MusicDone => "music_done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StageTimeout => "stage_timeout",
            Self::ProviderFailure => "provider_failure",
            Self::DispatchFailed => "dispatch_failed",
            Self::SegmentFailed => "segment_failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Aggregation rule: true when every segment state is at or past `stage`.
///
/// An empty iterator is not ready; a video with no segments has nothing to
/// concatenate.
#[must_use]
pub fn aggregate_ready<I>(states: I, stage: StageKind) -> bool
where
    I: IntoIterator<Item = PipelineState>,
{
    debug_assert_eq!(stage.scope(), StageScope::Segment);
    let mut any = false;
    for state in states {
        any = true;
        if !state.at_or_past(stage) {
            return false;
        }
    }
    any
}

/// Validates that segment sequence indices are exactly `{0, 1, ..., N-1}`.
///
/// Concatenation ordering depends on this; a gap or duplicate is an
/// [`InvariantViolation`].
pub fn validate_sequence(video: Uuid, indices: &[u32]) -> Result<(), InvariantViolation> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    let contiguous = sorted
        .iter()
        .enumerate()
        .all(|(expected, &actual)| actual as usize == expected);
    if indices.is_empty() || !contiguous {
        return Err(InvariantViolation::NonContiguousSequence {
            video,
            indices: sorted,
        });
    }
    Ok(())
}
