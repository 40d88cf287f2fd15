//! The Segment record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{EntityKind, EntityStatus, FailureReason, MediaRef, PipelineState};
use crate::model::StageAttempt;
use crate::utils::{generate_uuid, now, Timestamp};

/// One slice of a video's script.
///
/// The sequence index defines concatenation order and must be unique within
/// a video and contiguous from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Unique id.
    pub id: Uuid,
    /// The owning video.
    pub video_id: Uuid,
    /// 0-based position within the video.
    pub sequence: u32,
    /// The script slice to voice.
    pub source_text: String,
    /// Background footage supplied at creation; required input to media
    /// combination.
    pub background_ref: Option<MediaRef>,
    /// Current pipeline position.
    pub state: PipelineState,
    /// Coarse status derived from `state`.
    pub status: EntityStatus,
    /// Voice synthesis output, once available.
    pub voiceover_ref: Option<MediaRef>,
    /// Media combination output, once available.
    pub combined_ref: Option<MediaRef>,
    /// The live stage attempt, if a dispatch is in flight.
    pub attempt: Option<StageAttempt>,
    /// Terminal failure reason, if any.
    pub failure: Option<FailureReason>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last transition time.
    pub updated_at: Timestamp,
}

impl Segment {
    /// Creates a new segment in the `created` state.
    #[must_use]
    pub fn new(video_id: Uuid, sequence: u32, source_text: impl Into<String>) -> Self {
        let at = now();
        Self {
            id: generate_uuid(),
            video_id,
            sequence,
            source_text: source_text.into(),
            background_ref: None,
            state: PipelineState::Created,
            status: EntityStatus::Pending,
            voiceover_ref: None,
            combined_ref: None,
            attempt: None,
            failure: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Sets the background footage for media combination.
    #[must_use]
    pub fn with_background(mut self, background: MediaRef) -> Self {
        self.background_ref = Some(background);
        self
    }

    /// True once both segment-scoped stages have succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal(EntityKind::Segment) && self.status == EntityStatus::Complete
    }
}
