//! The stage scheduler: drives forward progress.
//!
//! `advance` decides which stage to run next for a video or segment, claims
//! the `*_dispatched` state via the ledger's CAS, issues the provider call,
//! and applies the retry policy on timeout or dispatch failure. Concurrent
//! invocations for one entity serialize through the CAS; losers are no-ops.

mod policy;
mod sweep;

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapter::{DispatchRequest, StageClientSet, StagePayload};
use crate::core::{
    aggregate_ready, validate_sequence, FailureReason, PipelineState, StageKind,
};
use crate::errors::{InvariantViolation, OrchestratorError};
use crate::events::{EventSink, NoOpEventSink, OrchestratorEvent};
use crate::ledger::{EntityId, JobLedger};
use crate::model::{CorrelationToken, StageAttempt};
use crate::utils::{now, Timestamp};

pub use policy::{BackoffStrategy, DispatchBackoff, JitterStrategy, StagePolicies, StagePolicy};
pub use sweep::TimeoutSweeper;

/// What one `advance` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A new stage attempt was dispatched.
    Dispatched {
        /// The dispatched stage.
        stage: StageKind,
        /// The 1-based attempt number.
        attempt: u32,
    },
    /// An attempt is in flight and not yet due; nothing to do.
    InFlight,
    /// A video-scoped stage is gated on segments that are not done yet.
    AwaitingSegments,
    /// A concurrent caller won the CAS; this call was a no-op.
    Lost,
    /// The entity is terminally complete.
    Complete,
    /// The entity is terminally failed.
    Failed {
        /// The recorded reason code.
        reason: FailureReason,
    },
}

/// Drives videos and segments through the pipeline.
pub struct StageScheduler {
    ledger: Arc<dyn JobLedger>,
    clients: StageClientSet,
    policies: StagePolicies,
    callback_base_url: String,
    events: Arc<dyn EventSink>,
}

impl StageScheduler {
    /// Creates a scheduler with a no-op event sink.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        clients: StageClientSet,
        policies: StagePolicies,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            clients,
            policies,
            callback_base_url: callback_base_url.into(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The ledger this scheduler coordinates through.
    #[must_use]
    pub fn ledger(&self) -> Arc<dyn JobLedger> {
        Arc::clone(&self.ledger)
    }

    /// Fans out the first stage for every segment of a video.
    ///
    /// Refuses to start when segment sequence indices are not contiguous.
    pub async fn start_video(
        &self,
        video_id: Uuid,
    ) -> Result<Vec<(Uuid, AdvanceOutcome)>, OrchestratorError> {
        let segments = self.ledger.list_segments(video_id).await?;
        let indices: Vec<u32> = segments.iter().map(|s| s.sequence).collect();
        validate_sequence(video_id, &indices)?;

        let mut outcomes = Vec::with_capacity(segments.len());
        for segment in segments {
            let outcome = self.advance(EntityId::Segment(segment.id)).await?;
            outcomes.push((segment.id, outcome));
        }
        Ok(outcomes)
    }

    /// Advances an entity: dispatches the next stage, applies timeout
    /// retries, or does nothing when the state machine says to wait.
    pub async fn advance(&self, id: EntityId) -> Result<AdvanceOutcome, OrchestratorError> {
        let snap = self.ledger.snapshot(id).await?;

        if snap.state == PipelineState::Failed {
            return Ok(AdvanceOutcome::Failed {
                reason: snap.failure.unwrap_or(FailureReason::Cancelled),
            });
        }
        if snap.state.is_terminal(id.kind()) {
            return Ok(AdvanceOutcome::Complete);
        }

        if let Some(attempt) = snap.attempt {
            if !attempt.is_due(now()) {
                return Ok(AdvanceOutcome::InFlight);
            }
            return self.retry_timed_out(id, attempt).await;
        }

        let (stage, needs_claim) = match snap.state.next_stage(id.kind()) {
            Some(stage) => (stage, true),
            // A dispatched state with no live attempt: a previous dispatch
            // loop died between claim and record. Resume it.
            None => match snap.state.live_stage() {
                Some(stage) => (stage, false),
                None => return Ok(AdvanceOutcome::InFlight),
            },
        };

        if stage == StageKind::Concatenation {
            let segments = self.ledger.list_segments(id.uuid()).await?;
            let indices: Vec<u32> = segments.iter().map(|s| s.sequence).collect();
            validate_sequence(id.uuid(), &indices)?;
            let states = segments.iter().map(|s| s.state);
            if !aggregate_ready(states, StageKind::MediaCombination) {
                return Ok(AdvanceOutcome::AwaitingSegments);
            }
        }

        let payload = self.build_payload(id, stage).await?;
        payload.ensure_usable(id)?;

        if needs_claim
            && !self
                .ledger
                .try_transition(id, snap.state, stage.dispatched_state(), None)
                .await?
        {
            return Ok(AdvanceOutcome::Lost);
        }

        self.dispatch_stage(id, stage, payload, 1, None).await
    }

    /// Marks an entity failed from outside the pipeline.
    ///
    /// Returns false when it was already terminal.
    pub async fn cancel(&self, id: EntityId) -> Result<bool, OrchestratorError> {
        let applied = self
            .ledger
            .mark_failed(id, FailureReason::Cancelled, None)
            .await?;
        if applied {
            self.events
                .emit(OrchestratorEvent::new("entity.cancelled").for_entity(id))
                .await;
            self.cascade_failure(id).await?;
        }
        Ok(applied)
    }

    /// Advances every entity whose attempt deadline has elapsed.
    ///
    /// Per-entity faults are logged and skipped so one bad row cannot stall
    /// the sweep.
    pub async fn run_due(
        &self,
        at: Timestamp,
    ) -> Result<Vec<(EntityId, AdvanceOutcome)>, OrchestratorError> {
        let due = self.ledger.due_attempts(at).await?;
        let mut outcomes = Vec::with_capacity(due.len());
        for id in due {
            match self.advance(id).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(err) => {
                    tracing::warn!(entity = %id, error = %err, "timeout sweep skipped entity");
                }
            }
        }
        Ok(outcomes)
    }

    async fn retry_timed_out(
        &self,
        id: EntityId,
        attempt: StageAttempt,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let policy = self.policies.policy_for(attempt.stage);
        if attempt.attempt >= policy.max_attempts {
            let failed = self
                .ledger
                .mark_failed(id, FailureReason::StageTimeout, Some(&attempt.token))
                .await?;
            if !failed {
                // A callback resolved the attempt while we were deciding.
                return Ok(AdvanceOutcome::Lost);
            }
            self.events
                .emit(
                    OrchestratorEvent::new("stage.timeout")
                        .for_entity(id)
                        .with_stage(attempt.stage)
                        .with_data(json!({ "attempts": attempt.attempt })),
                )
                .await;
            self.cascade_failure(id).await?;
            return Ok(AdvanceOutcome::Failed {
                reason: FailureReason::StageTimeout,
            });
        }

        self.events
            .emit(
                OrchestratorEvent::new("stage.timeout_retry")
                    .for_entity(id)
                    .with_stage(attempt.stage)
                    .with_data(json!({ "attempt": attempt.attempt + 1 })),
            )
            .await;

        let payload = self.build_payload(id, attempt.stage).await?;
        payload.ensure_usable(id)?;
        self.dispatch_stage(id, attempt.stage, payload, attempt.attempt + 1, Some(attempt.token))
            .await
    }

    /// Records a fresh attempt, then calls the provider.
    ///
    /// The attempt is installed before the provider call so a racing
    /// callback or sweeper loses the token CAS instead of orphaning a
    /// dispatched job. Transient dispatch errors consume the same attempt
    /// ceiling as timeouts.
    async fn dispatch_stage(
        &self,
        id: EntityId,
        stage: StageKind,
        payload: StagePayload,
        first_attempt: u32,
        supersedes: Option<CorrelationToken>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let policy = self.policies.policy_for(stage);
        let mut supersedes = supersedes;
        let mut attempt_no = first_attempt;

        loop {
            let token = CorrelationToken::mint();
            let attempt =
                StageAttempt::new(stage, token.clone(), attempt_no, now(), policy.timeout());
            if !self
                .ledger
                .record_attempt(id, attempt, supersedes.as_ref())
                .await?
            {
                return Ok(AdvanceOutcome::Lost);
            }

            let request = DispatchRequest {
                stage,
                entity: id,
                token: token.clone(),
                callback_url: self.callback_url(stage, &token),
                payload: payload.clone(),
            };

            match self.clients.client_for(stage).dispatch(&request).await {
                Ok(receipt) => {
                    self.events
                        .emit(
                            OrchestratorEvent::new("stage.dispatched")
                                .for_entity(id)
                                .with_stage(stage)
                                .with_data(json!({
                                    "attempt": attempt_no,
                                    "provider_job_id": receipt.provider_job_id,
                                })),
                        )
                        .await;
                    return Ok(AdvanceOutcome::Dispatched {
                        stage,
                        attempt: attempt_no,
                    });
                }
                Err(err) if err.is_transient() && attempt_no < policy.max_attempts => {
                    self.events
                        .emit(
                            OrchestratorEvent::new("stage.dispatch_retry")
                                .for_entity(id)
                                .with_stage(stage)
                                .with_data(json!({ "attempt": attempt_no, "error": err.to_string() })),
                        )
                        .await;
                    tokio::time::sleep(self.policies.backoff.delay_for(attempt_no)).await;
                    supersedes = Some(token);
                    attempt_no += 1;
                }
                Err(err) => {
                    self.events
                        .emit(
                            OrchestratorEvent::new("stage.dispatch_failed")
                                .for_entity(id)
                                .with_stage(stage)
                                .with_data(json!({ "error": err.to_string() })),
                        )
                        .await;
                    if self
                        .ledger
                        .mark_failed(id, FailureReason::DispatchFailed, Some(&token))
                        .await?
                    {
                        self.cascade_failure(id).await?;
                    }
                    return Ok(AdvanceOutcome::Failed {
                        reason: FailureReason::DispatchFailed,
                    });
                }
            }
        }
    }

    /// Propagates a segment failure to its parent video.
    pub(crate) async fn cascade_failure(&self, id: EntityId) -> Result<(), OrchestratorError> {
        let EntityId::Segment(segment_id) = id else {
            return Ok(());
        };
        let segment = self.ledger.get_segment(segment_id).await?;
        let video = EntityId::Video(segment.video_id);
        if self
            .ledger
            .mark_failed(video, FailureReason::SegmentFailed, None)
            .await?
        {
            self.events
                .emit(
                    OrchestratorEvent::new("video.failed")
                        .for_entity(video)
                        .with_data(json!({ "segment": segment_id.to_string() })),
                )
                .await;
        }
        Ok(())
    }

    async fn build_payload(
        &self,
        id: EntityId,
        stage: StageKind,
    ) -> Result<StagePayload, OrchestratorError> {
        let missing = |what| InvariantViolation::MissingMedia {
            entity: id.uuid(),
            stage,
            what,
        };
        match stage {
            StageKind::VoiceSynthesis => {
                let segment = self.ledger.get_segment(id.uuid()).await?;
                Ok(StagePayload::VoiceSynthesis {
                    text: segment.source_text,
                })
            }
            StageKind::MediaCombination => {
                let segment = self.ledger.get_segment(id.uuid()).await?;
                Ok(StagePayload::MediaCombination {
                    voiceover: segment.voiceover_ref.ok_or_else(|| missing("voiceover"))?,
                    background: segment.background_ref.ok_or_else(|| missing("background"))?,
                })
            }
            StageKind::Concatenation => {
                let segments = self.ledger.list_segments(id.uuid()).await?;
                let mut inputs = Vec::with_capacity(segments.len());
                for segment in segments {
                    inputs.push(
                        segment
                            .combined_ref
                            .ok_or_else(|| missing("combined segment clips"))?,
                    );
                }
                Ok(StagePayload::Concatenation { inputs })
            }
            StageKind::MusicGeneration => {
                let video = self.ledger.get_video(id.uuid()).await?;
                Ok(StagePayload::MusicGeneration {
                    video: video.concat_ref.ok_or_else(|| missing("concatenated video"))?,
                })
            }
        }
    }

    fn callback_url(&self, stage: StageKind, token: &CorrelationToken) -> String {
        format!(
            "{}/callbacks/{}/{}",
            self.callback_base_url.trim_end_matches('/'),
            stage.provider(),
            token
        )
    }
}
