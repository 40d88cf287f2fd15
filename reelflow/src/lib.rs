//! # Reelflow
//!
//! A webhook-driven orchestrator for script-to-video rendering pipelines.
//!
//! Reelflow tracks each unit of work (script → video → segments) through a
//! multi-stage state machine, dispatches stage requests to external media
//! processors (voice synthesis, media combination, concatenation, music
//! generation), correlates their asynchronous webhook completions back to
//! the right attempt, and enforces per-stage timeout/retry budgets:
//!
//! - **At-most-one-in-flight per stage**: every dispatch claims its state
//!   through a compare-and-swap on the job ledger, so concurrent
//!   schedulers, sweeps and callbacks serialize per entity without locks
//! - **Idempotent completion**: correlation tokens are minted per attempt
//!   and invalidated on retry or resolution, making duplicate and
//!   out-of-order webhook deliveries safe no-ops
//! - **Aggregate gating**: a video's concatenation starts only once every
//!   segment's clip is done, ordered by persisted sequence index
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reelflow::prelude::*;
//!
//! let ledger: Arc<dyn JobLedger> = Arc::new(InMemoryLedger::new());
//! let scheduler = Arc::new(StageScheduler::new(
//!     Arc::clone(&ledger),
//!     clients,
//!     StagePolicies::default(),
//!     "https://orchestrator.example",
//! ));
//! let correlator = WebhookCorrelator::new(Arc::clone(&scheduler));
//!
//! ledger.create_video(video, segments).await?;
//! scheduler.start_video(video_id).await?;
//! // ...webhooks arrive...
//! correlator.on_raw_callback(provider, token, &body).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapter;
pub mod core;
pub mod correlator;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod testing;
pub mod utils;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::adapter::{
        DispatchError, DispatchReceipt, DispatchRequest, StageClient, StageClientSet,
        StagePayload,
    };
    pub use crate::core::{
        EntityKind, EntityStatus, FailureReason, MediaKind, MediaRef, PipelineState,
        ProviderKind, StageKind,
    };
    pub use crate::correlator::{CallbackDisposition, WebhookCorrelator};
    pub use crate::errors::{
        CallbackParseError, InvariantViolation, LedgerError, OrchestratorError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, OrchestratorEvent};
    pub use crate::ledger::{EntityId, InMemoryLedger, JobLedger};
    pub use crate::model::{
        CorrelationToken, Segment, StageAttempt, Video, WebhookEvent, WebhookOutcome,
    };
    pub use crate::scheduler::{
        AdvanceOutcome, StagePolicies, StagePolicy, StageScheduler, TimeoutSweeper,
    };
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
