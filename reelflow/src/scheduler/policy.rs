//! Per-stage timeout/retry budgets and dispatch backoff.
//!
//! Loadable from any external configuration source via serde; every field
//! has a default derived from observed provider latencies.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::StageKind;

/// Timeout and retry budget for one stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Seconds to wait for the provider callback before a retry.
    pub timeout_seconds: f64,
    /// Total attempts (initial dispatch + retries) before terminal failure.
    pub max_attempts: u32,
}

impl StagePolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(timeout_seconds: f64, max_attempts: u32) -> Self {
        Self {
            timeout_seconds,
            max_attempts,
        }
    }

    /// The callback timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.0))
    }
}

fn default_voice() -> StagePolicy {
    StagePolicy::new(180.0, 3)
}

fn default_media() -> StagePolicy {
    StagePolicy::new(300.0, 3)
}

fn default_concat() -> StagePolicy {
    StagePolicy::new(600.0, 2)
}

fn default_music() -> StagePolicy {
    StagePolicy::new(300.0, 3)
}

/// The full per-stage policy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicies {
    /// Voice synthesis budget (observed target ~60s).
    #[serde(default = "default_voice")]
    pub voice_synthesis: StagePolicy,
    /// Media combination budget (observed target ~120s).
    #[serde(default = "default_media")]
    pub media_combination: StagePolicy,
    /// Concatenation budget (observed target ~300s).
    #[serde(default = "default_concat")]
    pub concatenation: StagePolicy,
    /// Music generation budget (observed target ~120s).
    #[serde(default = "default_music")]
    pub music_generation: StagePolicy,
    /// Backoff between in-process dispatch retries.
    #[serde(default)]
    pub backoff: DispatchBackoff,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            voice_synthesis: default_voice(),
            media_combination: default_media(),
            concatenation: default_concat(),
            music_generation: default_music(),
            backoff: DispatchBackoff::default(),
        }
    }
}

impl StagePolicies {
    /// The policy for a stage kind.
    #[must_use]
    pub fn policy_for(&self, stage: StageKind) -> StagePolicy {
        match stage {
            StageKind::VoiceSynthesis => self.voice_synthesis,
            StageKind::MediaCombination => self.media_combination,
            StageKind::Concatenation => self.concatenation,
            StageKind::MusicGeneration => self.music_generation,
        }
    }
}

/// Backoff strategy for dispatch retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Delay schedule between in-process dispatch retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchBackoff {
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for DispatchBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl DispatchBackoff {
    /// The delay before retrying after the given 1-based attempt number.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1)),
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Constant => self.base_delay_ms,
        };
        let capped = raw.min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => {
                if capped == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=capped)
                }
            }
            JitterStrategy::Equal => {
                let half = capped / 2;
                if half == 0 {
                    capped
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}
