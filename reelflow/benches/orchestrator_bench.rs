//! Benchmarks for the orchestration hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use reelflow::core::PipelineState;
use reelflow::ledger::{EntityId, InMemoryLedger, JobLedger};
use reelflow::model::CorrelationToken;
use reelflow::testing::sample_video;

fn token_mint(c: &mut Criterion) {
    c.bench_function("correlation_token_mint", |b| {
        b.iter(|| black_box(CorrelationToken::mint()));
    });
}

fn state_machine(c: &mut Criterion) {
    c.bench_function("next_stage_lookup", |b| {
        b.iter(|| {
            for state in [
                PipelineState::Created,
                PipelineState::VoiceDone,
                PipelineState::ConcatDone,
            ] {
                black_box(state.next_stage(black_box(reelflow::core::EntityKind::Segment)));
                black_box(state.next_stage(black_box(reelflow::core::EntityKind::Video)));
            }
        });
    });
}

fn ledger_cas(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    c.bench_function("ledger_claim_and_resolve", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let ledger = Arc::new(InMemoryLedger::new());
                let (video, segments) = sample_video(1);
                let segment_id = segments[0].id;
                ledger.create_video(video, segments).await.expect("create");

                let id = EntityId::Segment(segment_id);
                ledger
                    .try_transition(
                        id,
                        PipelineState::Created,
                        PipelineState::VoiceDispatched,
                        None,
                    )
                    .await
                    .expect("claim");
                ledger
                    .try_transition(
                        id,
                        PipelineState::VoiceDispatched,
                        PipelineState::VoiceDone,
                        None,
                    )
                    .await
                    .expect("resolve");
            });
        });
    });
}

criterion_group!(benches, token_mint, state_machine, ledger_cas);
criterion_main!(benches);
