//! The webhook correlator.
//!
//! Maps inbound provider callbacks back to the attempt that dispatched
//! them, applies the completion transition idempotently, and re-triggers
//! the scheduler. Every syntactically valid callback is acknowledged; the
//! dispositions below tell the HTTP front door what happened, never whether
//! to retry.

mod normalize;

use serde_json::json;
use std::sync::Arc;

use crate::core::{FailureReason, PipelineState, ProviderKind};
use crate::errors::OrchestratorError;
use crate::events::{EventSink, NoOpEventSink, OrchestratorEvent};
use crate::ledger::{EntityId, JobLedger};
use crate::model::{CorrelationToken, WebhookEvent, WebhookOutcome};
use crate::scheduler::StageScheduler;

pub use normalize::normalize_callback;

/// What handling a callback did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// The callback resolved its attempt and the entity moved.
    Applied {
        /// The entity that moved.
        entity: EntityId,
    },
    /// Unknown, superseded, or already-resolved token; discarded.
    Stale,
}

/// Receives normalized webhook events and resolves attempts.
pub struct WebhookCorrelator {
    ledger: Arc<dyn JobLedger>,
    scheduler: Arc<StageScheduler>,
    events: Arc<dyn EventSink>,
}

impl WebhookCorrelator {
    /// Creates a correlator sharing the scheduler's ledger.
    #[must_use]
    pub fn new(scheduler: Arc<StageScheduler>) -> Self {
        Self {
            ledger: scheduler.ledger(),
            scheduler,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Normalizes a raw provider callback body, then handles it.
    ///
    /// Convenience for the HTTP front door: token from the URL path, body
    /// as received.
    pub async fn on_raw_callback(
        &self,
        provider: ProviderKind,
        token: CorrelationToken,
        body: &serde_json::Value,
    ) -> Result<CallbackDisposition, OrchestratorError> {
        let event = normalize_callback(provider, token, body)?;
        self.on_callback(event).await
    }

    /// Handles a normalized webhook event.
    ///
    /// Duplicate deliveries of a resolved event and callbacks for
    /// superseded attempts return [`CallbackDisposition::Stale`] without
    /// error; the caller acknowledges receipt either way.
    pub async fn on_callback(
        &self,
        event: WebhookEvent,
    ) -> Result<CallbackDisposition, OrchestratorError> {
        let Some((id, attempt)) = self.ledger.find_attempt(&event.token).await? else {
            self.emit_stale(&event, "unknown or superseded token").await;
            return Ok(CallbackDisposition::Stale);
        };

        if attempt.stage.provider() != event.provider {
            self.emit_stale(&event, "provider does not match attempt").await;
            return Ok(CallbackDisposition::Stale);
        }

        let dispatched = attempt.stage.dispatched_state();
        match &event.outcome {
            WebhookOutcome::Success { artifact } => {
                let applied = self
                    .ledger
                    .try_transition(id, dispatched, attempt.stage.done_state(), Some(&event.token))
                    .await?;
                if !applied {
                    self.emit_stale(&event, "state already advanced").await;
                    return Ok(CallbackDisposition::Stale);
                }

                self.ledger
                    .store_artifact(id, attempt.stage, artifact.clone())
                    .await?;
                self.events
                    .emit(
                        OrchestratorEvent::new("stage.completed")
                            .for_entity(id)
                            .with_stage(attempt.stage)
                            .with_data(json!({ "attempt": attempt.attempt })),
                    )
                    .await;

                self.scheduler.advance(id).await?;
                self.reconsider_parent(id).await?;
                Ok(CallbackDisposition::Applied { entity: id })
            }
            WebhookOutcome::Failure { message } => {
                let message = message.clone();
                let applied = self
                    .ledger
                    .mark_failed(id, FailureReason::ProviderFailure, Some(&event.token))
                    .await?;
                if !applied {
                    self.emit_stale(&event, "state already advanced").await;
                    return Ok(CallbackDisposition::Stale);
                }

                self.events
                    .emit(
                        OrchestratorEvent::new("stage.failed")
                            .for_entity(id)
                            .with_stage(attempt.stage)
                            .with_data(json!({ "message": message })),
                    )
                    .await;
                self.scheduler.cascade_failure(id).await?;
                Ok(CallbackDisposition::Applied { entity: id })
            }
        }
    }

    /// A segment that just finished its last segment-scoped stage makes the
    /// parent video re-check aggregate readiness.
    async fn reconsider_parent(&self, id: EntityId) -> Result<(), OrchestratorError> {
        let EntityId::Segment(segment_id) = id else {
            return Ok(());
        };
        let segment = self.ledger.get_segment(segment_id).await?;
        if segment.state == PipelineState::MediaDone {
            self.scheduler
                .advance(EntityId::Video(segment.video_id))
                .await?;
        }
        Ok(())
    }

    async fn emit_stale(&self, event: &WebhookEvent, why: &str) {
        tracing::debug!(
            provider = %event.provider,
            token = %event.token,
            idempotency_key = %event.idempotency_key(),
            why,
            "discarding stale callback"
        );
        self.events
            .emit(
                OrchestratorEvent::new("webhook.stale").with_data(json!({
                    "provider": event.provider.to_string(),
                    "idempotency_key": event.idempotency_key(),
                    "why": why,
                })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{StageClient, StageClientSet};
    use crate::core::{MediaRef, StageKind};
    use crate::events::CollectingEventSink;
    use crate::ledger::InMemoryLedger;
    use crate::model::{Segment, Video};
    use crate::scheduler::StagePolicies;
    use crate::testing::MockStageClient;
    use uuid::Uuid;

    struct Harness {
        correlator: WebhookCorrelator,
        scheduler: Arc<StageScheduler>,
        ledger: Arc<InMemoryLedger>,
        client: Arc<MockStageClient>,
        events: Arc<CollectingEventSink>,
        video_id: Uuid,
        segment_ids: Vec<Uuid>,
    }

    async fn harness(segment_count: u32) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = Arc::new(MockStageClient::new());
        let events = Arc::new(CollectingEventSink::new());

        let video = Video::new("script", 8.0);
        let video_id = video.id;
        let segments: Vec<Segment> = (0..segment_count)
            .map(|i| {
                Segment::new(video_id, i, format!("slice {i}"))
                    .with_background(MediaRef::video(format!("s3://bg/{i}.mp4")))
            })
            .collect();
        ledger.create_video(video, segments).await.unwrap();
        let segment_ids: Vec<Uuid> = ledger
            .list_segments(video_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        let scheduler = Arc::new(StageScheduler::new(
            Arc::clone(&ledger) as Arc<dyn JobLedger>,
            StageClientSet::uniform(Arc::clone(&client) as Arc<dyn StageClient>),
            StagePolicies::default(),
            "https://orch.example",
        ));
        let correlator = WebhookCorrelator::new(Arc::clone(&scheduler))
            .with_events(Arc::clone(&events) as Arc<dyn EventSink>);

        Harness {
            correlator,
            scheduler,
            ledger,
            client,
            events,
            video_id,
            segment_ids,
        }
    }

    #[tokio::test]
    async fn test_success_callback_advances_to_next_stage() {
        let h = harness(1).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();
        let token = h.client.requests().pop().unwrap().token;

        let disposition = h
            .correlator
            .on_callback(WebhookEvent::success(
                ProviderKind::Voice,
                token,
                MediaRef::audio("s3://voice/0.mp3"),
            ))
            .await
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::Applied { entity: id });

        // Artifact stored and the next stage dispatched.
        let segment = h.ledger.get_segment(h.segment_ids[0]).await.unwrap();
        assert_eq!(segment.state, PipelineState::MediaDispatched);
        assert_eq!(
            segment.voiceover_ref.unwrap().location,
            "s3://voice/0.mp3"
        );
        assert_eq!(h.client.dispatch_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_stale_noop() {
        let h = harness(1).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();
        let token = h.client.requests().pop().unwrap().token;

        let event = WebhookEvent::success(
            ProviderKind::Voice,
            token,
            MediaRef::audio("s3://voice/0.mp3"),
        );
        let first = h.correlator.on_callback(event.clone()).await.unwrap();
        let second = h.correlator.on_callback(event).await.unwrap();

        assert!(matches!(first, CallbackDisposition::Applied { .. }));
        assert_eq!(second, CallbackDisposition::Stale);
        // Exactly one media dispatch followed the voice completion.
        assert_eq!(h.client.dispatch_count(), 2);
        assert_eq!(h.events.events_named("webhook.stale").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_stale() {
        let h = harness(1).await;
        let disposition = h
            .correlator
            .on_callback(WebhookEvent::success(
                ProviderKind::Voice,
                CorrelationToken::mint(),
                MediaRef::audio("s3://voice/x.mp3"),
            ))
            .await
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::Stale);
    }

    #[tokio::test]
    async fn test_provider_mismatch_is_stale() {
        let h = harness(1).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();
        let token = h.client.requests().pop().unwrap().token;

        let disposition = h
            .correlator
            .on_callback(WebhookEvent::success(
                ProviderKind::Music,
                token,
                MediaRef::audio("s3://melody.mp3"),
            ))
            .await
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::Stale);
        assert_eq!(
            h.ledger.snapshot(id).await.unwrap().state,
            PipelineState::VoiceDispatched
        );
    }

    #[tokio::test]
    async fn test_failure_callback_is_terminal_and_cascades() {
        let h = harness(2).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();
        let token = h.client.requests().pop().unwrap().token;

        let disposition = h
            .correlator
            .on_callback(WebhookEvent::failure(
                ProviderKind::Voice,
                token,
                "synthesis error",
            ))
            .await
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::Applied { entity: id });

        let segment = h.ledger.get_segment(h.segment_ids[0]).await.unwrap();
        assert_eq!(segment.state, PipelineState::Failed);
        assert_eq!(segment.failure, Some(FailureReason::ProviderFailure));

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.failure, Some(FailureReason::SegmentFailed));
    }

    #[tokio::test]
    async fn test_segment_media_done_triggers_video_aggregate_check() {
        let h = harness(1).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();

        // Voice completes.
        let token = h.client.requests().pop().unwrap().token;
        h.correlator
            .on_callback(WebhookEvent::success(
                ProviderKind::Voice,
                token,
                MediaRef::audio("s3://voice/0.mp3"),
            ))
            .await
            .unwrap();

        // Media combination completes; the lone segment is done, so the
        // video must claim concatenation.
        let token = h.client.requests().pop().unwrap().token;
        h.correlator
            .on_callback(WebhookEvent::success(
                ProviderKind::Media,
                token,
                MediaRef::audio_video("s3://combined/0.mp4"),
            ))
            .await
            .unwrap();

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::ConcatDispatched);

        let concat_request = h.client.requests().pop().unwrap();
        assert_eq!(concat_request.stage, StageKind::Concatenation);
    }

    #[tokio::test]
    async fn test_raw_callback_round_trip() {
        let h = harness(1).await;
        let id = EntityId::Segment(h.segment_ids[0]);
        h.scheduler.advance(id).await.unwrap();
        let token = h.client.requests().pop().unwrap().token;

        let body = serde_json::json!({
            "status": "completed",
            "audio_url": "s3://voice/0.mp3",
        });
        let disposition = h
            .correlator
            .on_raw_callback(ProviderKind::Voice, token, &body)
            .await
            .unwrap();
        assert!(matches!(disposition, CallbackDisposition::Applied { .. }));
    }
}
