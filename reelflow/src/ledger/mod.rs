//! The job ledger: the authoritative record of pipeline progress.
//!
//! One row per Video, child rows per Segment. All coordination between the
//! scheduler and the correlator happens through compare-and-swap on these
//! rows, never through in-process locks spanning the two paths, so the
//! orchestrator is correct whether it runs as one process or a pool of
//! stateless workers.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::{EntityKind, EntityStatus, FailureReason, MediaRef, PipelineState, StageKind};
use crate::errors::LedgerError;
use crate::model::{CorrelationToken, Segment, StageAttempt, Video};
use crate::utils::Timestamp;

pub use memory::InMemoryLedger;

/// Identifies a ledger row: a video or one of its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    /// A video row.
    Video(Uuid),
    /// A segment row.
    Segment(Uuid),
}

impl EntityId {
    /// The underlying uuid.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Video(id) | Self::Segment(id) => *id,
        }
    }

    /// The entity kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Video(_) => EntityKind::Video,
            Self::Segment(_) => EntityKind::Segment,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(id) => write!(f, "video/{id}"),
            Self::Segment(id) => write!(f, "segment/{id}"),
        }
    }
}

/// Point-in-time view of a row's orchestration fields.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    /// The row identity.
    pub id: EntityId,
    /// Current pipeline position.
    pub state: PipelineState,
    /// Derived status.
    pub status: EntityStatus,
    /// Live attempt, if a dispatch is in flight.
    pub attempt: Option<StageAttempt>,
    /// Failure reason, if terminal.
    pub failure: Option<FailureReason>,
    /// Last transition time.
    pub updated_at: Timestamp,
}

/// Persistence surface required by the orchestrator core.
///
/// Backable by any store offering single-row compare-and-swap semantics;
/// [`InMemoryLedger`] is the reference implementation.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Creates a video and its segments atomically.
    ///
    /// Rejects non-contiguous segment sequence indices.
    async fn create_video(&self, video: Video, segments: Vec<Segment>) -> Result<(), LedgerError>;

    /// Reads a video row.
    async fn get_video(&self, id: Uuid) -> Result<Video, LedgerError>;

    /// Reads a segment row.
    async fn get_segment(&self, id: Uuid) -> Result<Segment, LedgerError>;

    /// Reads the orchestration fields of either row kind.
    async fn snapshot(&self, id: EntityId) -> Result<EntitySnapshot, LedgerError>;

    /// Lists a video's segments, ordered by sequence index.
    async fn list_segments(&self, video: Uuid) -> Result<Vec<Segment>, LedgerError>;

    /// Compare-and-swap on the row's state.
    ///
    /// Succeeds only if the persisted state equals `expected` and, when
    /// `attempt` is given, the live attempt token matches it too. Entering
    /// a `*_done` state clears the live attempt. Returns `false` when the
    /// CAS loses; the caller's action is a no-op, not an error.
    async fn try_transition(
        &self,
        id: EntityId,
        expected: PipelineState,
        next: PipelineState,
        attempt: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError>;

    /// Installs a live attempt, superseding a previous one.
    ///
    /// With `supersedes: None` the row must have no live attempt; otherwise
    /// the live attempt's token must equal `supersedes`. Returns `false`
    /// when the guard fails (a callback or competing dispatch won).
    async fn record_attempt(
        &self,
        id: EntityId,
        attempt: StageAttempt,
        supersedes: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError>;

    /// Maps a correlation token back to its owning row and live attempt.
    ///
    /// Returns `None` for tokens that were superseded or already resolved;
    /// the callback carrying them is stale.
    async fn find_attempt(
        &self,
        token: &CorrelationToken,
    ) -> Result<Option<(EntityId, StageAttempt)>, LedgerError>;

    /// Persists a stage's output artifact onto the row.
    async fn store_artifact(
        &self,
        id: EntityId,
        stage: StageKind,
        artifact: MediaRef,
    ) -> Result<(), LedgerError>;

    /// Marks the row terminally failed with a reason code.
    ///
    /// Applies only from a non-terminal state and, when `attempt` is given,
    /// only while that attempt is still live. Clears the live attempt.
    /// Returns `false` when the row already moved on.
    async fn mark_failed(
        &self,
        id: EntityId,
        reason: FailureReason,
        attempt: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError>;

    /// Rows whose live attempt deadline has elapsed as of `now`.
    async fn due_attempts(&self, now: Timestamp) -> Result<Vec<EntityId>, LedgerError>;
}
