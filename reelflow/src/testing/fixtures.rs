//! Canned videos and ledgers for tests.

use std::sync::Arc;

use crate::core::MediaRef;
use crate::ledger::{InMemoryLedger, JobLedger};
use crate::model::{Segment, Video};

/// Builds a video with `segment_count` contiguous segments, each with
/// background footage attached.
#[must_use]
pub fn sample_video(segment_count: u32) -> (Video, Vec<Segment>) {
    let video = Video::new("An explainer script about tide pools.", 8.0);
    let segments = (0..segment_count)
        .map(|i| {
            Segment::new(video.id, i, format!("Narration for scene {i}."))
                .with_background(MediaRef::video(format!("s3://backgrounds/scene-{i}.mp4")))
        })
        .collect();
    (video, segments)
}

/// An in-memory ledger holding one sample video; returns the ledger and the
/// video id.
pub async fn seeded_ledger(segment_count: u32) -> (Arc<InMemoryLedger>, uuid::Uuid) {
    let ledger = Arc::new(InMemoryLedger::new());
    let (video, segments) = sample_video(segment_count);
    let video_id = video.id;
    ledger
        .create_video(video, segments)
        .await
        .unwrap_or_else(|err| panic!("fixture video rejected: {err}"));
    (ledger, video_id)
}
