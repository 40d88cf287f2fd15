//! Stage attempts and the correlation tokens that identify them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::core::StageKind;
use crate::utils::Timestamp;

/// Opaque identifier minted per dispatch attempt.
///
/// Round-trips through the provider and its webhook; the correlator has no
/// other way to map a callback back to an attempt. Minted from UUIDv4 bytes
/// and base64-url encoded so it fits in a callback URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Mints a fresh token, unique per attempt.
    #[must_use]
    pub fn mint() -> Self {
        Self(URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()))
    }

    /// Wraps a token received on the wire (e.g. from a callback URL path).
    #[must_use]
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One in-flight call to an external provider.
///
/// Owned by the scheduler for the duration of the call; superseded, never
/// mutated, on retry. A callback referencing a superseded token is stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttempt {
    /// The stage being executed.
    pub stage: StageKind,
    /// Token echoed back by the provider's webhook.
    pub token: CorrelationToken,
    /// 1-based attempt counter, shared across dispatch and timeout retries.
    pub attempt: u32,
    /// When the dispatch was issued.
    pub dispatched_at: Timestamp,
    /// When the attempt counts as timed out.
    pub deadline: Timestamp,
}

impl StageAttempt {
    /// Creates an attempt record for a dispatch issued at `now`.
    #[must_use]
    pub fn new(
        stage: StageKind,
        token: CorrelationToken,
        attempt: u32,
        now: Timestamp,
        timeout: Duration,
    ) -> Self {
        let deadline = now
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            stage,
            token,
            attempt,
            dispatched_at: now,
            deadline,
        }
    }

    /// True once the deadline has elapsed with no callback.
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }
}
