//! Error taxonomy for the orchestrator.
//!
//! Entity-level failures (timeouts, provider-reported failures) are not
//! errors here; they are recorded in the ledger as terminal state with a
//! reason code. The types in this module cover the faults that surface to a
//! caller of `advance`/`on_callback`: store-level failures, invariant
//! violations, and malformed callbacks.

use thiserror::Error;
use uuid::Uuid;

use crate::core::StageKind;

/// Top-level error for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The record store failed or refused an operation.
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    /// A pipeline invariant was found violated.
    #[error("{0}")]
    Invariant(#[from] InvariantViolation),

    /// An inbound callback payload could not be normalized.
    #[error("{0}")]
    Callback(#[from] CallbackParseError),
}

/// Errors from the record store.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// No entity with this id exists.
    #[error("entity not found: {entity}")]
    NotFound {
        /// The missing entity id.
        entity: Uuid,
    },

    /// The operation conflicts with existing state (e.g. duplicate create).
    #[error("ledger conflict for {entity}: {message}")]
    Conflict {
        /// The entity involved.
        entity: Uuid,
        /// What conflicted.
        message: String,
    },

    /// The backing store failed.
    #[error("ledger store error: {message}")]
    Store {
        /// Store-reported detail.
        message: String,
    },
}

/// A pipeline invariant found violated at runtime.
///
/// Fatal to the triggering operation and surfaced to its caller; never
/// applied to the ledger, so other entities are unaffected.
#[derive(Debug, Clone, Error)]
pub enum InvariantViolation {
    /// Segment sequence indices are not exactly `{0..N-1}`.
    #[error("segments of video {video} are not contiguous from 0: {indices:?}")]
    NonContiguousSequence {
        /// The owning video.
        video: Uuid,
        /// The observed indices, sorted.
        indices: Vec<u32>,
    },

    /// A segment has no source text to synthesize.
    #[error("segment {segment} has empty source text")]
    EmptySource {
        /// The offending segment.
        segment: Uuid,
    },

    /// A stage input that should exist by now is missing.
    #[error("{stage} dispatch for {entity} is missing required media: {what}")]
    MissingMedia {
        /// The entity being dispatched.
        entity: Uuid,
        /// The stage that needs the input.
        stage: StageKind,
        /// Which input is missing.
        what: &'static str,
    },
}

/// Errors translating a provider callback body into a [`crate::model::WebhookEvent`].
#[derive(Debug, Clone, Error)]
pub enum CallbackParseError {
    /// A required field is absent.
    #[error("callback is missing field '{field}'")]
    MissingField {
        /// The absent field name.
        field: &'static str,
    },

    /// The outcome indicator had an unrecognized value.
    #[error("callback reported unknown status '{value}'")]
    UnknownStatus {
        /// The unrecognized value.
        value: String,
    },

    /// The body was not the expected shape at all.
    #[error("malformed callback body: {message}")]
    Malformed {
        /// Parse detail.
        message: String,
    },
}
