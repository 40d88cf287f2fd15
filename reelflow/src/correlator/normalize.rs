//! Per-provider callback normalization.
//!
//! Each provider names its status and artifact fields differently; this
//! module turns a raw callback body into a [`WebhookEvent`]. Syntactic
//! problems are [`CallbackParseError`]; the HTTP front door still
//! acknowledges receipt, it just has nothing to hand to the correlator.

use serde::Deserialize;

use crate::core::{MediaRef, ProviderKind};
use crate::errors::CallbackParseError;
use crate::model::{CorrelationToken, WebhookEvent};

/// Voice provider callback shape.
#[derive(Debug, Deserialize)]
struct VoiceCallback {
    status: String,
    audio_url: Option<String>,
    error: Option<String>,
}

/// Media provider callback shape (combination and concatenation).
#[derive(Debug, Deserialize)]
struct MediaCallback {
    state: String,
    output: Option<MediaCallbackOutput>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaCallbackOutput {
    url: String,
}

/// Music provider callback shape.
#[derive(Debug, Deserialize)]
struct MusicCallback {
    outcome: String,
    track_url: Option<String>,
    detail: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(body: &'a serde_json::Value) -> Result<T, CallbackParseError> {
    T::deserialize(body).map_err(|err| CallbackParseError::Malformed {
        message: err.to_string(),
    })
}

/// Normalizes a provider callback body into a [`WebhookEvent`].
pub fn normalize_callback(
    provider: ProviderKind,
    token: CorrelationToken,
    body: &serde_json::Value,
) -> Result<WebhookEvent, CallbackParseError> {
    match provider {
        ProviderKind::Voice => {
            let callback: VoiceCallback = parse(body)?;
            match callback.status.as_str() {
                "completed" => {
                    let url = callback
                        .audio_url
                        .ok_or(CallbackParseError::MissingField { field: "audio_url" })?;
                    Ok(WebhookEvent::success(provider, token, MediaRef::audio(url)))
                }
                "failed" => Ok(WebhookEvent::failure(
                    provider,
                    token,
                    callback.error.unwrap_or_else(|| "voice synthesis failed".to_string()),
                )),
                other => Err(CallbackParseError::UnknownStatus {
                    value: other.to_string(),
                }),
            }
        }
        ProviderKind::Media => {
            let callback: MediaCallback = parse(body)?;
            match callback.state.as_str() {
                "done" => {
                    let output = callback
                        .output
                        .ok_or(CallbackParseError::MissingField { field: "output" })?;
                    Ok(WebhookEvent::success(
                        provider,
                        token,
                        MediaRef::audio_video(output.url),
                    ))
                }
                "error" => Ok(WebhookEvent::failure(
                    provider,
                    token,
                    callback.message.unwrap_or_else(|| "media processing failed".to_string()),
                )),
                other => Err(CallbackParseError::UnknownStatus {
                    value: other.to_string(),
                }),
            }
        }
        ProviderKind::Music => {
            let callback: MusicCallback = parse(body)?;
            match callback.outcome.as_str() {
                "success" => {
                    let url = callback
                        .track_url
                        .ok_or(CallbackParseError::MissingField { field: "track_url" })?;
                    Ok(WebhookEvent::success(
                        provider,
                        token,
                        MediaRef::audio_video(url),
                    ))
                }
                "failure" => Ok(WebhookEvent::failure(
                    provider,
                    token,
                    callback.detail.unwrap_or_else(|| "music generation failed".to_string()),
                )),
                other => Err(CallbackParseError::UnknownStatus {
                    value: other.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WebhookOutcome;
    use serde_json::json;

    fn token() -> CorrelationToken {
        CorrelationToken::mint()
    }

    #[test]
    fn test_voice_success() {
        let event = normalize_callback(
            ProviderKind::Voice,
            token(),
            &json!({"status": "completed", "audio_url": "s3://voice/1.mp3"}),
        )
        .unwrap();
        assert!(event.is_success());
        match event.outcome {
            WebhookOutcome::Success { artifact } => {
                assert_eq!(artifact.location, "s3://voice/1.mp3");
            }
            WebhookOutcome::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn test_voice_success_without_artifact_is_malformed() {
        let err = normalize_callback(
            ProviderKind::Voice,
            token(),
            &json!({"status": "completed"}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CallbackParseError::MissingField { field: "audio_url" }
        ));
    }

    #[test]
    fn test_voice_failure_carries_error() {
        let event = normalize_callback(
            ProviderKind::Voice,
            token(),
            &json!({"status": "failed", "error": "bad voice id"}),
        )
        .unwrap();
        match event.outcome {
            WebhookOutcome::Failure { message } => assert_eq!(message, "bad voice id"),
            WebhookOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn test_media_success_nested_output() {
        let event = normalize_callback(
            ProviderKind::Media,
            token(),
            &json!({"state": "done", "output": {"url": "s3://combined/1.mp4"}}),
        )
        .unwrap();
        assert!(event.is_success());
    }

    #[test]
    fn test_music_failure_default_message() {
        let event = normalize_callback(
            ProviderKind::Music,
            token(),
            &json!({"outcome": "failure"}),
        )
        .unwrap();
        match event.outcome {
            WebhookOutcome::Failure { message } => {
                assert_eq!(message, "music generation failed");
            }
            WebhookOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = normalize_callback(
            ProviderKind::Media,
            token(),
            &json!({"state": "halfway"}),
        )
        .unwrap_err();
        assert!(matches!(err, CallbackParseError::UnknownStatus { .. }));
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let err = normalize_callback(ProviderKind::Voice, token(), &json!(["not", "an", "object"]))
            .unwrap_err();
        assert!(matches!(err, CallbackParseError::Malformed { .. }));
    }
}
