//! The Video record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{EntityKind, EntityStatus, FailureReason, MediaRef, PipelineState};
use crate::model::StageAttempt;
use crate::utils::{generate_uuid, now, Timestamp};

/// A script-level unit of work.
///
/// Created together with its segments at pipeline start, mutated only by
/// the scheduler (dispatch) and the correlator (completion), never deleted
/// by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Unique id.
    pub id: Uuid,
    /// The source script.
    pub script: String,
    /// Target duration per segment, in seconds.
    pub target_segment_seconds: f64,
    /// Child segment ids, ordered by sequence index.
    pub segment_ids: Vec<Uuid>,
    /// Current pipeline position.
    pub state: PipelineState,
    /// Coarse status derived from `state`.
    pub status: EntityStatus,
    /// Concatenation output, once available.
    pub concat_ref: Option<MediaRef>,
    /// Final output with music, once available.
    pub final_media_ref: Option<MediaRef>,
    /// The live stage attempt, if a dispatch is in flight.
    pub attempt: Option<StageAttempt>,
    /// Terminal failure reason, if any.
    pub failure: Option<FailureReason>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last transition time.
    pub updated_at: Timestamp,
}

impl Video {
    /// Creates a new video in the `created` state.
    #[must_use]
    pub fn new(script: impl Into<String>, target_segment_seconds: f64) -> Self {
        let at = now();
        Self {
            id: generate_uuid(),
            script: script.into(),
            target_segment_seconds,
            segment_ids: Vec::new(),
            state: PipelineState::Created,
            status: EntityStatus::Pending,
            concat_ref: None,
            final_media_ref: None,
            attempt: None,
            failure: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// True once every stage has succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal(EntityKind::Video) && self.status == EntityStatus::Complete
    }
}
