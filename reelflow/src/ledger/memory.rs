//! In-memory reference implementation of the job ledger.
//!
//! Preserves the compare-and-swap semantics a hosted tabular store would
//! provide, so the scheduler/correlator race behavior can be exercised
//! without a network.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{EntityId, EntitySnapshot, JobLedger};
use crate::core::{
    validate_sequence, EntityKind, FailureReason, MediaRef, PipelineState, StageKind,
};
use crate::errors::LedgerError;
use crate::model::{CorrelationToken, Segment, StageAttempt, Video};
use crate::utils::{now, Timestamp};

/// Uniform mutable access to the orchestration fields of either row kind.
trait Row {
    fn kind(&self) -> EntityKind;
    fn state(&self) -> PipelineState;
    fn attempt(&self) -> Option<&StageAttempt>;
    fn set_state(&mut self, next: PipelineState);
    fn set_attempt(&mut self, attempt: Option<StageAttempt>);
    fn set_failure(&mut self, reason: FailureReason);
    fn put_artifact(&mut self, stage: StageKind, artifact: MediaRef) -> Result<(), LedgerError>;
}

impl Row for Video {
    fn kind(&self) -> EntityKind {
        EntityKind::Video
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn attempt(&self) -> Option<&StageAttempt> {
        self.attempt.as_ref()
    }

    fn set_state(&mut self, next: PipelineState) {
        self.state = next;
        self.status = next.status_for(EntityKind::Video);
        self.updated_at = now();
    }

    fn set_attempt(&mut self, attempt: Option<StageAttempt>) {
        self.attempt = attempt;
        self.updated_at = now();
    }

    fn set_failure(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
    }

    fn put_artifact(&mut self, stage: StageKind, artifact: MediaRef) -> Result<(), LedgerError> {
        match stage {
            StageKind::Concatenation => self.concat_ref = Some(artifact),
            StageKind::MusicGeneration => self.final_media_ref = Some(artifact),
            StageKind::VoiceSynthesis | StageKind::MediaCombination => {
                return Err(LedgerError::Conflict {
                    entity: self.id,
                    message: format!("{stage} artifacts belong to segments"),
                })
            }
        }
        self.updated_at = now();
        Ok(())
    }
}

impl Row for Segment {
    fn kind(&self) -> EntityKind {
        EntityKind::Segment
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn attempt(&self) -> Option<&StageAttempt> {
        self.attempt.as_ref()
    }

    fn set_state(&mut self, next: PipelineState) {
        self.state = next;
        self.status = next.status_for(EntityKind::Segment);
        self.updated_at = now();
    }

    fn set_attempt(&mut self, attempt: Option<StageAttempt>) {
        self.attempt = attempt;
        self.updated_at = now();
    }

    fn set_failure(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
    }

    fn put_artifact(&mut self, stage: StageKind, artifact: MediaRef) -> Result<(), LedgerError> {
        match stage {
            StageKind::VoiceSynthesis => self.voiceover_ref = Some(artifact),
            StageKind::MediaCombination => self.combined_ref = Some(artifact),
            StageKind::Concatenation | StageKind::MusicGeneration => {
                return Err(LedgerError::Conflict {
                    entity: self.id,
                    message: format!("{stage} artifacts belong to videos"),
                })
            }
        }
        self.updated_at = now();
        Ok(())
    }
}

/// In-memory job ledger with single-row CAS semantics.
#[derive(Default)]
pub struct InMemoryLedger {
    videos: Mutex<HashMap<Uuid, Video>>,
    segments: Mutex<HashMap<Uuid, Segment>>,
    /// Live token → owning row. Maintained under the row lock.
    tokens: DashMap<String, EntityId>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of video rows.
    #[must_use]
    pub fn video_count(&self) -> usize {
        self.videos.lock().len()
    }

    /// Number of live attempt tokens across all rows.
    #[must_use]
    pub fn live_token_count(&self) -> usize {
        self.tokens.len()
    }

    fn with_row<R>(
        &self,
        id: EntityId,
        f: impl FnOnce(&mut dyn Row) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        match id {
            EntityId::Video(uuid) => {
                let mut rows = self.videos.lock();
                let row = rows.get_mut(&uuid).ok_or(LedgerError::NotFound { entity: uuid })?;
                f(row)
            }
            EntityId::Segment(uuid) => {
                let mut rows = self.segments.lock();
                let row = rows.get_mut(&uuid).ok_or(LedgerError::NotFound { entity: uuid })?;
                f(row)
            }
        }
    }

    fn drop_token(&self, token: &CorrelationToken) {
        self.tokens.remove(token.as_str());
    }
}

#[async_trait]
impl JobLedger for InMemoryLedger {
    async fn create_video(&self, video: Video, segments: Vec<Segment>) -> Result<(), LedgerError> {
        let indices: Vec<u32> = segments.iter().map(|s| s.sequence).collect();
        validate_sequence(video.id, &indices).map_err(|err| LedgerError::Conflict {
            entity: video.id,
            message: err.to_string(),
        })?;

        let mut videos = self.videos.lock();
        if videos.contains_key(&video.id) {
            return Err(LedgerError::Conflict {
                entity: video.id,
                message: "video already exists".to_string(),
            });
        }

        let mut ordered = segments;
        ordered.sort_by_key(|s| s.sequence);

        let mut video = video;
        video.segment_ids = ordered.iter().map(|s| s.id).collect();
        videos.insert(video.id, video);

        let mut rows = self.segments.lock();
        for segment in ordered {
            rows.insert(segment.id, segment);
        }
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> Result<Video, LedgerError> {
        self.videos
            .lock()
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound { entity: id })
    }

    async fn get_segment(&self, id: Uuid) -> Result<Segment, LedgerError> {
        self.segments
            .lock()
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound { entity: id })
    }

    async fn snapshot(&self, id: EntityId) -> Result<EntitySnapshot, LedgerError> {
        match id {
            EntityId::Video(uuid) => {
                let video = self.get_video(uuid).await?;
                Ok(EntitySnapshot {
                    id,
                    state: video.state,
                    status: video.status,
                    attempt: video.attempt,
                    failure: video.failure,
                    updated_at: video.updated_at,
                })
            }
            EntityId::Segment(uuid) => {
                let segment = self.get_segment(uuid).await?;
                Ok(EntitySnapshot {
                    id,
                    state: segment.state,
                    status: segment.status,
                    attempt: segment.attempt,
                    failure: segment.failure,
                    updated_at: segment.updated_at,
                })
            }
        }
    }

    async fn list_segments(&self, video: Uuid) -> Result<Vec<Segment>, LedgerError> {
        let ids = self.get_video(video).await?.segment_ids;
        let rows = self.segments.lock();
        let mut segments = Vec::with_capacity(ids.len());
        for id in ids {
            let segment = rows.get(&id).ok_or(LedgerError::NotFound { entity: id })?;
            segments.push(segment.clone());
        }
        Ok(segments)
    }

    async fn try_transition(
        &self,
        id: EntityId,
        expected: PipelineState,
        next: PipelineState,
        attempt: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError> {
        let mut released = None;
        let applied = self.with_row(id, |row| {
            if row.state() != expected {
                return Ok(false);
            }
            if let Some(token) = attempt {
                match row.attempt() {
                    Some(live) if &live.token == token => {}
                    _ => return Ok(false),
                }
            }
            row.set_state(next);
            if next.live_stage().is_none() {
                // Leaving a dispatched state resolves the live attempt.
                released = row.attempt().map(|a| a.token.clone());
                row.set_attempt(None);
            }
            Ok(true)
        })?;
        if let Some(token) = released {
            self.drop_token(&token);
        }
        Ok(applied)
    }

    async fn record_attempt(
        &self,
        id: EntityId,
        attempt: StageAttempt,
        supersedes: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError> {
        let token = attempt.token.clone();
        let mut released = None;
        let installed = self.with_row(id, |row| {
            match (row.attempt(), supersedes) {
                (None, None) => {}
                (Some(live), Some(old)) if &live.token == old => {
                    released = Some(live.token.clone());
                }
                _ => return Ok(false),
            }
            row.set_attempt(Some(attempt));
            Ok(true)
        })?;
        if installed {
            if let Some(old) = released {
                self.drop_token(&old);
            }
            self.tokens.insert(token.as_str().to_string(), id);
        }
        Ok(installed)
    }

    async fn find_attempt(
        &self,
        token: &CorrelationToken,
    ) -> Result<Option<(EntityId, StageAttempt)>, LedgerError> {
        let Some(entry) = self.tokens.get(token.as_str()) else {
            return Ok(None);
        };
        let id = *entry.value();
        drop(entry);

        // Re-check under the row lock: the index may lag a concurrent
        // resolution by a moment.
        let live = self.with_row(id, |row| {
            Ok(row
                .attempt()
                .filter(|a| &a.token == token)
                .cloned())
        })?;
        Ok(live.map(|attempt| (id, attempt)))
    }

    async fn store_artifact(
        &self,
        id: EntityId,
        stage: StageKind,
        artifact: MediaRef,
    ) -> Result<(), LedgerError> {
        self.with_row(id, |row| row.put_artifact(stage, artifact))
    }

    async fn mark_failed(
        &self,
        id: EntityId,
        reason: FailureReason,
        attempt: Option<&CorrelationToken>,
    ) -> Result<bool, LedgerError> {
        let mut released = None;
        let applied = self.with_row(id, |row| {
            if row.state().is_terminal(row.kind()) {
                return Ok(false);
            }
            if let Some(token) = attempt {
                match row.attempt() {
                    Some(live) if &live.token == token => {}
                    _ => return Ok(false),
                }
            }
            released = row.attempt().map(|a| a.token.clone());
            row.set_failure(reason);
            row.set_state(PipelineState::Failed);
            row.set_attempt(None);
            Ok(true)
        })?;
        if let Some(token) = released {
            self.drop_token(&token);
        }
        Ok(applied)
    }

    async fn due_attempts(&self, now: Timestamp) -> Result<Vec<EntityId>, LedgerError> {
        let mut due = Vec::new();
        {
            let rows = self.segments.lock();
            due.extend(rows.values().filter_map(|s| {
                s.attempt
                    .as_ref()
                    .filter(|a| a.is_due(now))
                    .map(|_| EntityId::Segment(s.id))
            }));
        }
        {
            let rows = self.videos.lock();
            due.extend(rows.values().filter_map(|v| {
                v.attempt
                    .as_ref()
                    .filter(|a| a.is_due(now))
                    .map(|_| EntityId::Video(v.id))
            }));
        }
        Ok(due)
    }
}
