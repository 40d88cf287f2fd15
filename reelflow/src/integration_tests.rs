//! End-to-end orchestration scenarios.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::adapter::{DispatchRequest, StageClient, StageClientSet, StagePayload};
    use crate::core::{
        EntityStatus, FailureReason, MediaRef, PipelineState, StageKind,
    };
    use crate::correlator::{CallbackDisposition, WebhookCorrelator};
    use crate::errors::{LedgerError, OrchestratorError};
    use crate::events::{CollectingEventSink, EventSink};
    use crate::ledger::{EntityId, EntitySnapshot, InMemoryLedger, JobLedger};
    use crate::model::{
        CorrelationToken, Segment, StageAttempt, Video, WebhookEvent,
    };
    use crate::scheduler::{
        AdvanceOutcome, BackoffStrategy, DispatchBackoff, JitterStrategy, StagePolicies,
        StagePolicy, StageScheduler,
    };
    use crate::testing::{sample_video, MockStageClient};
    use crate::utils::Timestamp;

    struct Harness {
        scheduler: Arc<StageScheduler>,
        correlator: Arc<WebhookCorrelator>,
        ledger: Arc<InMemoryLedger>,
        client: Arc<MockStageClient>,
        events: Arc<CollectingEventSink>,
        video_id: Uuid,
        segment_ids: Vec<Uuid>,
    }

    async fn harness_with(policies: StagePolicies, segment_count: u32) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = Arc::new(MockStageClient::new());
        let events = Arc::new(CollectingEventSink::new());

        let (video, segments) = sample_video(segment_count);
        let video_id = video.id;
        ledger.create_video(video, segments).await.unwrap();
        let segment_ids: Vec<Uuid> = ledger
            .list_segments(video_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        let scheduler = Arc::new(
            StageScheduler::new(
                Arc::clone(&ledger) as Arc<dyn JobLedger>,
                StageClientSet::uniform(Arc::clone(&client) as Arc<dyn StageClient>),
                policies,
                "https://orchestrator.example",
            )
            .with_events(Arc::clone(&events) as Arc<dyn EventSink>),
        );
        let correlator = Arc::new(
            WebhookCorrelator::new(Arc::clone(&scheduler))
                .with_events(Arc::clone(&events) as Arc<dyn EventSink>),
        );

        Harness {
            scheduler,
            correlator,
            ledger,
            client,
            events,
            video_id,
            segment_ids,
        }
    }

    async fn harness(segment_count: u32) -> Harness {
        harness_with(StagePolicies::default(), segment_count).await
    }

    fn no_sleep_backoff() -> DispatchBackoff {
        DispatchBackoff {
            base_delay_ms: 0,
            max_delay_ms: 0,
            strategy: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    impl Harness {
        fn latest_request(&self, entity: EntityId, stage: StageKind) -> DispatchRequest {
            self.client
                .requests()
                .into_iter()
                .rev()
                .find(|r| r.entity == entity && r.stage == stage)
                .unwrap_or_else(|| panic!("no {stage} dispatch recorded for {entity}"))
        }

        async fn succeed(&self, request: &DispatchRequest, location: &str) -> CallbackDisposition {
            let artifact = match request.stage {
                StageKind::VoiceSynthesis => MediaRef::audio(location),
                _ => MediaRef::audio_video(location),
            };
            self.correlator
                .on_callback(WebhookEvent::success(
                    request.stage.provider(),
                    request.token.clone(),
                    artifact,
                ))
                .await
                .unwrap()
        }

        /// Drives a segment through voice and media completion.
        async fn finish_segment(&self, index: usize) {
            let id = EntityId::Segment(self.segment_ids[index]);
            let voice = self.latest_request(id, StageKind::VoiceSynthesis);
            self.succeed(&voice, &format!("s3://voice/{index}.mp3")).await;
            let media = self.latest_request(id, StageKind::MediaCombination);
            self.succeed(&media, &format!("s3://combined/{index}.mp4")).await;
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_happy_path() {
        let h = harness(3).await;
        h.scheduler.start_video(h.video_id).await.unwrap();
        assert_eq!(h.client.dispatch_count(), 3);

        for index in 0..3 {
            h.finish_segment(index).await;
        }

        // All segments done, concatenation claimed exactly once.
        let video_entity = EntityId::Video(h.video_id);
        let concat = h.latest_request(video_entity, StageKind::Concatenation);
        h.succeed(&concat, "s3://concat/full.mp4").await;

        let music = h.latest_request(video_entity, StageKind::MusicGeneration);
        h.succeed(&music, "s3://final/full.mp4").await;

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::MusicDone);
        assert_eq!(video.status, EntityStatus::Complete);
        assert!(video.is_complete());
        assert_eq!(video.concat_ref.unwrap().location, "s3://concat/full.mp4");
        assert_eq!(
            video.final_media_ref.unwrap().location,
            "s3://final/full.mp4"
        );

        // 3 voice + 3 media + 1 concat + 1 music.
        assert_eq!(h.client.dispatch_count(), 8);
        assert_eq!(h.ledger.live_token_count(), 0);
    }

    #[tokio::test]
    async fn test_no_stage_is_skipped_per_segment() {
        let h = harness(1).await;
        h.scheduler.start_video(h.video_id).await.unwrap();
        h.finish_segment(0).await;

        let id = EntityId::Segment(h.segment_ids[0]);
        let stages: Vec<StageKind> = h
            .events
            .events()
            .into_iter()
            .filter(|e| e.entity == Some(id))
            .filter(|e| e.name == "stage.dispatched" || e.name == "stage.completed")
            .filter_map(|e| e.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                StageKind::VoiceSynthesis,
                StageKind::VoiceSynthesis,
                StageKind::MediaCombination,
                StageKind::MediaCombination,
            ]
        );
    }

    #[tokio::test]
    async fn test_reverse_completion_order_still_concatenates_in_sequence() {
        let h = harness(3).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        // Callbacks arrive in order 2, 0, 1 for both segment stages.
        for index in [2usize, 0, 1] {
            h.finish_segment(index).await;
        }

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::ConcatDispatched);

        let concat = h.latest_request(EntityId::Video(h.video_id), StageKind::Concatenation);
        let StagePayload::Concatenation { inputs } = concat.payload else {
            panic!("expected concatenation payload");
        };
        let locations: Vec<&str> = inputs.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(
            locations,
            vec![
                "s3://combined/0.mp4",
                "s3://combined/1.mp4",
                "s3://combined/2.mp4"
            ]
        );
    }

    #[tokio::test]
    async fn test_concat_claimed_once_under_concurrent_completions() {
        let h = harness(3).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        // Finish all voice stages first.
        for index in 0..3 {
            let id = EntityId::Segment(h.segment_ids[index]);
            let voice = h.latest_request(id, StageKind::VoiceSynthesis);
            h.succeed(&voice, &format!("s3://voice/{index}.mp3")).await;
        }

        // Fire the three media callbacks concurrently; each winner
        // re-checks aggregate readiness on the video.
        let mut tasks = Vec::new();
        for index in 0..3 {
            let id = EntityId::Segment(h.segment_ids[index]);
            let media = h.latest_request(id, StageKind::MediaCombination);
            let correlator = Arc::clone(&h.correlator);
            tasks.push(tokio::spawn(async move {
                correlator
                    .on_callback(WebhookEvent::success(
                        media.stage.provider(),
                        media.token.clone(),
                        MediaRef::audio_video(format!("s3://combined/{index}.mp4")),
                    ))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::ConcatDispatched);

        let concat_dispatches = h
            .client
            .requests()
            .into_iter()
            .filter(|r| r.stage == StageKind::Concatenation)
            .count();
        assert_eq!(concat_dispatches, 1);
    }

    #[tokio::test]
    async fn test_replayed_success_produces_one_transition_and_artifact() {
        let h = harness(1).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        let id = EntityId::Segment(h.segment_ids[0]);
        let voice = h.latest_request(id, StageKind::VoiceSynthesis);

        let first = h.succeed(&voice, "s3://voice/original.mp3").await;
        assert!(matches!(first, CallbackDisposition::Applied { .. }));

        // A replay, even one claiming a different artifact, is a no-op.
        let replay = h.succeed(&voice, "s3://voice/imposter.mp3").await;
        assert_eq!(replay, CallbackDisposition::Stale);

        let segment = h.ledger.get_segment(h.segment_ids[0]).await.unwrap();
        assert_eq!(segment.state, PipelineState::MediaDispatched);
        assert_eq!(
            segment.voiceover_ref.unwrap().location,
            "s3://voice/original.mp3"
        );
        // One voice dispatch, one media dispatch; the replay added nothing.
        assert_eq!(h.client.dispatch_count(), 2);
    }

    #[tokio::test]
    async fn test_media_timeout_at_ceiling_fails_segment_and_video_only() {
        let policies = StagePolicies {
            media_combination: StagePolicy::new(0.0, 2),
            backoff: no_sleep_backoff(),
            ..StagePolicies::default()
        };
        let h = harness_with(policies, 3).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        // Segments 0 and 2 complete both stages; segment 1 completes voice
        // but its media provider never calls back.
        h.finish_segment(0).await;
        h.finish_segment(2).await;
        let straggler = EntityId::Segment(h.segment_ids[1]);
        let voice = h.latest_request(straggler, StageKind::VoiceSynthesis);
        h.succeed(&voice, "s3://voice/1.mp3").await;

        // The media attempt deadline is immediate; two sweeps exhaust the
        // ceiling of 2.
        let retried = h.scheduler.advance(straggler).await.unwrap();
        assert_eq!(
            retried,
            AdvanceOutcome::Dispatched {
                stage: StageKind::MediaCombination,
                attempt: 2
            }
        );
        let failed = h.scheduler.advance(straggler).await.unwrap();
        assert_eq!(
            failed,
            AdvanceOutcome::Failed {
                reason: FailureReason::StageTimeout
            }
        );

        let segment1 = h.ledger.get_segment(h.segment_ids[1]).await.unwrap();
        assert_eq!(segment1.state, PipelineState::Failed);
        assert_eq!(segment1.failure, Some(FailureReason::StageTimeout));
        assert!(segment1.attempt.is_none());

        let video = h.ledger.get_video(h.video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::Failed);
        assert_eq!(video.failure, Some(FailureReason::SegmentFailed));

        // Siblings keep their last successful state and artifacts.
        for index in [0usize, 2] {
            let sibling = h.ledger.get_segment(h.segment_ids[index]).await.unwrap();
            assert_eq!(sibling.state, PipelineState::MediaDone);
            assert!(sibling.voiceover_ref.is_some());
            assert!(sibling.combined_ref.is_some());
        }

        // Nothing is left in flight anywhere.
        assert_eq!(h.ledger.live_token_count(), 0);
    }

    #[tokio::test]
    async fn test_late_callback_after_failure_is_stale() {
        let policies = StagePolicies {
            voice_synthesis: StagePolicy::new(0.0, 1),
            backoff: no_sleep_backoff(),
            ..StagePolicies::default()
        };
        let h = harness_with(policies, 1).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        let id = EntityId::Segment(h.segment_ids[0]);
        let voice = h.latest_request(id, StageKind::VoiceSynthesis);

        // The sweep fails the attempt before the provider answers.
        let outcome = h.scheduler.advance(id).await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Failed {
                reason: FailureReason::StageTimeout
            }
        );

        // The provider's answer eventually arrives, too late to matter.
        let disposition = h.succeed(&voice, "s3://voice/late.mp3").await;
        assert_eq!(disposition, CallbackDisposition::Stale);

        let segment = h.ledger.get_segment(h.segment_ids[0]).await.unwrap();
        assert_eq!(segment.state, PipelineState::Failed);
        assert!(segment.voiceover_ref.is_none());
    }

    #[tokio::test]
    async fn test_create_video_rejects_non_contiguous_indices() {
        let ledger = InMemoryLedger::new();
        let video = Video::new("script", 8.0);
        let segments = vec![
            Segment::new(video.id, 0, "a"),
            Segment::new(video.id, 2, "b"),
        ];
        let err = ledger.create_video(video, segments).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    /// Delegating ledger that hides one segment, simulating a store whose
    /// sequence invariant broke after creation.
    struct GappyLedger {
        inner: Arc<InMemoryLedger>,
        hidden_sequence: u32,
    }

    #[async_trait]
    impl JobLedger for GappyLedger {
        async fn create_video(
            &self,
            video: Video,
            segments: Vec<Segment>,
        ) -> Result<(), LedgerError> {
            self.inner.create_video(video, segments).await
        }

        async fn get_video(&self, id: Uuid) -> Result<Video, LedgerError> {
            self.inner.get_video(id).await
        }

        async fn get_segment(&self, id: Uuid) -> Result<Segment, LedgerError> {
            self.inner.get_segment(id).await
        }

        async fn snapshot(&self, id: EntityId) -> Result<EntitySnapshot, LedgerError> {
            self.inner.snapshot(id).await
        }

        async fn list_segments(&self, video: Uuid) -> Result<Vec<Segment>, LedgerError> {
            Ok(self
                .inner
                .list_segments(video)
                .await?
                .into_iter()
                .filter(|s| s.sequence != self.hidden_sequence)
                .collect())
        }

        async fn try_transition(
            &self,
            id: EntityId,
            expected: PipelineState,
            next: PipelineState,
            attempt: Option<&CorrelationToken>,
        ) -> Result<bool, LedgerError> {
            self.inner.try_transition(id, expected, next, attempt).await
        }

        async fn record_attempt(
            &self,
            id: EntityId,
            attempt: StageAttempt,
            supersedes: Option<&CorrelationToken>,
        ) -> Result<bool, LedgerError> {
            self.inner.record_attempt(id, attempt, supersedes).await
        }

        async fn find_attempt(
            &self,
            token: &CorrelationToken,
        ) -> Result<Option<(EntityId, StageAttempt)>, LedgerError> {
            self.inner.find_attempt(token).await
        }

        async fn store_artifact(
            &self,
            id: EntityId,
            stage: StageKind,
            artifact: MediaRef,
        ) -> Result<(), LedgerError> {
            self.inner.store_artifact(id, stage, artifact).await
        }

        async fn mark_failed(
            &self,
            id: EntityId,
            reason: FailureReason,
            attempt: Option<&CorrelationToken>,
        ) -> Result<bool, LedgerError> {
            self.inner.mark_failed(id, reason, attempt).await
        }

        async fn due_attempts(&self, now: Timestamp) -> Result<Vec<EntityId>, LedgerError> {
            self.inner.due_attempts(now).await
        }
    }

    #[tokio::test]
    async fn test_concat_refuses_broken_sequence_invariant() {
        let inner = Arc::new(InMemoryLedger::new());
        let (video, segments) = sample_video(3);
        let video_id = video.id;
        inner.create_video(video, segments).await.unwrap();

        let gappy = Arc::new(GappyLedger {
            inner: Arc::clone(&inner),
            hidden_sequence: 1,
        });
        let client = Arc::new(MockStageClient::new());
        let scheduler = StageScheduler::new(
            Arc::clone(&gappy) as Arc<dyn JobLedger>,
            StageClientSet::uniform(Arc::clone(&client) as Arc<dyn StageClient>),
            StagePolicies::default(),
            "https://orchestrator.example",
        );

        // Mark the two visible segments done directly through the inner
        // ledger, then ask the video to advance.
        for segment in inner.list_segments(video_id).await.unwrap() {
            if segment.sequence == 1 {
                continue;
            }
            let id = EntityId::Segment(segment.id);
            inner
                .try_transition(id, PipelineState::Created, PipelineState::VoiceDispatched, None)
                .await
                .unwrap();
            inner
                .try_transition(
                    id,
                    PipelineState::VoiceDispatched,
                    PipelineState::VoiceDone,
                    None,
                )
                .await
                .unwrap();
            inner
                .try_transition(id, PipelineState::VoiceDone, PipelineState::MediaDispatched, None)
                .await
                .unwrap();
            inner
                .try_transition(
                    id,
                    PipelineState::MediaDispatched,
                    PipelineState::MediaDone,
                    None,
                )
                .await
                .unwrap();
        }

        let err = scheduler
            .advance(EntityId::Video(video_id))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Invariant(_)));

        // The video did not claim concatenation and no dispatch went out.
        let video = inner.get_video(video_id).await.unwrap();
        assert_eq!(video.state, PipelineState::Created);
        assert_eq!(client.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_video_remains_inspectable() {
        let policies = StagePolicies {
            media_combination: StagePolicy::new(0.0, 1),
            backoff: no_sleep_backoff(),
            ..StagePolicies::default()
        };
        let h = harness_with(policies, 1).await;
        h.scheduler.start_video(h.video_id).await.unwrap();

        let id = EntityId::Segment(h.segment_ids[0]);
        let voice = h.latest_request(id, StageKind::VoiceSynthesis);
        h.succeed(&voice, "s3://voice/0.mp3").await;
        // Media times out at a ceiling of 1.
        h.scheduler.advance(id).await.unwrap();

        let segment = h.ledger.get_segment(h.segment_ids[0]).await.unwrap();
        assert_eq!(segment.status, EntityStatus::Failed);
        // The upstream voice artifact is still there for inspection.
        assert_eq!(segment.voiceover_ref.unwrap().location, "s3://voice/0.mp3");
    }
}
