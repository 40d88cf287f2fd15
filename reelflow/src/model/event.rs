//! Normalized webhook events.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{MediaRef, ProviderKind};
use crate::model::CorrelationToken;

/// What a provider callback reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The provider produced an artifact.
    Success {
        /// Where the artifact can be fetched.
        artifact: MediaRef,
    },
    /// The provider concluded it cannot produce output.
    Failure {
        /// Provider-reported detail.
        message: String,
    },
}

/// A provider completion callback, normalized across providers.
///
/// Transient: consumed once to resolve the owning attempt, then discarded.
/// Replays of an identical event are safely ignorable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// The provider that called back.
    pub provider: ProviderKind,
    /// The attempt token echoed from the callback URL.
    pub token: CorrelationToken,
    /// Reported outcome.
    pub outcome: WebhookOutcome,
}

impl WebhookEvent {
    /// Creates a success event.
    #[must_use]
    pub fn success(provider: ProviderKind, token: CorrelationToken, artifact: MediaRef) -> Self {
        Self {
            provider,
            token,
            outcome: WebhookOutcome::Success { artifact },
        }
    }

    /// Creates a failure event.
    #[must_use]
    pub fn failure(
        provider: ProviderKind,
        token: CorrelationToken,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            token,
            outcome: WebhookOutcome::Failure {
                message: message.into(),
            },
        }
    }

    /// True when the provider reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, WebhookOutcome::Success { .. })
    }

    /// Idempotency key over (provider, token, outcome discriminant).
    ///
    /// Two deliveries of the same event hash identically, which is what
    /// makes replays detectable in logs.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let outcome = if self.is_success() { "success" } else { "failure" };
        let mut hasher = Sha256::new();
        hasher.update(self.provider.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(self.token.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(outcome.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}
