//! Stage client adapter: the uniform interface over the three external
//! asynchronous media processors.
//!
//! The adapter translates a dispatch request into a provider call and
//! nothing more: payloads arrive pre-validated, retry policy lives in the
//! scheduler, and the correlation token is forwarded into the callback URL
//! the provider will echo back.

#[cfg(feature = "providers")]
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::core::{MediaRef, ProviderKind, StageKind};
use crate::errors::InvariantViolation;
use crate::ledger::EntityId;
use crate::model::CorrelationToken;

#[cfg(feature = "providers")]
pub use http::{HttpClientConfig, MediaHttpClient, MusicHttpClient, VoiceHttpClient};

/// Stage inputs, validated before the adapter sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    /// Voice synthesis input.
    VoiceSynthesis {
        /// The text to voice.
        text: String,
    },
    /// Media combination input.
    MediaCombination {
        /// The segment's voiceover track.
        voiceover: MediaRef,
        /// The segment's background footage.
        background: MediaRef,
    },
    /// Concatenation input.
    Concatenation {
        /// Combined segment clips, in sequence order.
        inputs: Vec<MediaRef>,
    },
    /// Music generation input.
    MusicGeneration {
        /// The concatenated video.
        video: MediaRef,
    },
}

impl StagePayload {
    /// The stage this payload feeds.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            Self::VoiceSynthesis { .. } => StageKind::VoiceSynthesis,
            Self::MediaCombination { .. } => StageKind::MediaCombination,
            Self::Concatenation { .. } => StageKind::Concatenation,
            Self::MusicGeneration { .. } => StageKind::MusicGeneration,
        }
    }

    /// Asserts the payload carries usable inputs.
    ///
    /// Business-rule validation happens where the payload is built; this is
    /// the last-line check that nothing empty reaches a provider.
    pub fn ensure_usable(&self, entity: EntityId) -> Result<(), InvariantViolation> {
        let missing = |what| InvariantViolation::MissingMedia {
            entity: entity.uuid(),
            stage: self.stage(),
            what,
        };
        match self {
            Self::VoiceSynthesis { text } => {
                if text.trim().is_empty() {
                    return Err(InvariantViolation::EmptySource {
                        segment: entity.uuid(),
                    });
                }
            }
            Self::MediaCombination {
                voiceover,
                background,
            } => {
                if voiceover.is_empty() {
                    return Err(missing("voiceover"));
                }
                if background.is_empty() {
                    return Err(missing("background"));
                }
            }
            Self::Concatenation { inputs } => {
                if inputs.is_empty() || inputs.iter().any(MediaRef::is_empty) {
                    return Err(missing("combined segment clips"));
                }
            }
            Self::MusicGeneration { video } => {
                if video.is_empty() {
                    return Err(missing("concatenated video"));
                }
            }
        }
        Ok(())
    }
}

/// A dispatch handed to a provider client.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// The stage being executed.
    pub stage: StageKind,
    /// The owning video or segment.
    pub entity: EntityId,
    /// Fresh token for this attempt; the provider echoes it back.
    pub token: CorrelationToken,
    /// Callback URL with the token embedded.
    pub callback_url: String,
    /// Validated stage inputs.
    pub payload: StagePayload,
}

/// What the provider acknowledged at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct DispatchReceipt {
    /// Provider-side job id, when the provider reports one.
    pub provider_job_id: Option<String>,
}

/// Dispatch failure, classified for the scheduler's retry policy.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Network failure or 5xx; worth retrying.
    #[error("transient dispatch failure: {message}")]
    Transient {
        /// Transport-reported detail.
        message: String,
    },

    /// The provider refused the request; retrying the same payload is
    /// pointless.
    #[error("dispatch rejected{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Provider-reported detail.
        message: String,
    },
}

impl DispatchError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a rejection.
    #[must_use]
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// True when the scheduler should retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Uniform dispatch interface over the external processors.
///
/// One implementation per provider; the orchestrator core is written once
/// against this trait. Implementations must not retry internally.
#[async_trait]
pub trait StageClient: Send + Sync {
    /// Issues the provider call for one stage attempt.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError>;
}

/// The three provider clients, routed by stage kind.
#[derive(Clone)]
pub struct StageClientSet {
    voice: Arc<dyn StageClient>,
    media: Arc<dyn StageClient>,
    music: Arc<dyn StageClient>,
}

impl StageClientSet {
    /// Builds a set from one client per provider.
    #[must_use]
    pub fn new(
        voice: Arc<dyn StageClient>,
        media: Arc<dyn StageClient>,
        music: Arc<dyn StageClient>,
    ) -> Self {
        Self {
            voice,
            media,
            music,
        }
    }

    /// Routes every stage to a single client. Test convenience.
    #[must_use]
    pub fn uniform(client: Arc<dyn StageClient>) -> Self {
        Self {
            voice: Arc::clone(&client),
            media: Arc::clone(&client),
            music: client,
        }
    }

    /// The client serving a stage's provider.
    #[must_use]
    pub fn client_for(&self, stage: StageKind) -> &Arc<dyn StageClient> {
        match stage.provider() {
            ProviderKind::Voice => &self.voice,
            ProviderKind::Media => &self.media,
            ProviderKind::Music => &self.music,
        }
    }
}
