//! HTTP provider clients.
//!
//! One client per provider, each translating the uniform dispatch request
//! into that provider's request shape. Transport and 5xx failures map to
//! transient errors; everything else is a rejection. No retries here.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{DispatchError, DispatchReceipt, DispatchRequest, StageClient, StagePayload};
use crate::core::StageKind;

/// Connection settings for one provider endpoint.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the provider's submit endpoint.
    pub endpoint: String,
    /// Bearer token, if the provider requires one.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: f64,
}

impl HttpClientConfig {
    /// Creates a config for an endpoint with a 30s request timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout_seconds: 30.0,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn build_http(&self) -> Result<reqwest::Client, DispatchError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(self.timeout_seconds))
            .build()
            .map_err(|err| DispatchError::transient(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitAck {
    #[serde(alias = "id", alias = "job_id", alias = "task_id")]
    job: Option<String>,
}

async fn post_submit(
    http: &reqwest::Client,
    config: &HttpClientConfig,
    body: serde_json::Value,
) -> Result<DispatchReceipt, DispatchError> {
    let mut request = http.post(&config.endpoint).json(&body);
    if let Some(ref key) = config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|err| DispatchError::transient(err.to_string()))?;

    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(DispatchError::transient(format!(
            "provider returned {status}"
        )));
    }
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(DispatchError::rejected(Some(status.as_u16()), detail));
    }

    let ack: SubmitAck = response.json().await.unwrap_or(SubmitAck { job: None });
    Ok(DispatchReceipt {
        provider_job_id: ack.job,
    })
}

/// Client for the voice synthesis provider.
pub struct VoiceHttpClient {
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl VoiceHttpClient {
    /// Creates a voice client.
    pub fn new(config: HttpClientConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            http: config.build_http()?,
            config,
        })
    }
}

#[async_trait]
impl StageClient for VoiceHttpClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let StagePayload::VoiceSynthesis { ref text } = request.payload else {
            return Err(DispatchError::rejected(
                None,
                format!("voice provider cannot run {}", request.stage),
            ));
        };
        let body = json!({
            "text": text,
            "reference": request.token.as_str(),
            "callback_url": request.callback_url,
        });
        post_submit(&self.http, &self.config, body).await
    }
}

/// Client for the media provider (combination and concatenation).
pub struct MediaHttpClient {
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl MediaHttpClient {
    /// Creates a media client.
    pub fn new(config: HttpClientConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            http: config.build_http()?,
            config,
        })
    }
}

#[async_trait]
impl StageClient for MediaHttpClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let body = match request.payload {
            StagePayload::MediaCombination {
                ref voiceover,
                ref background,
            } => json!({
                "operation": "combine",
                "audio_url": voiceover.location,
                "video_url": background.location,
                "notify_url": request.callback_url,
            }),
            StagePayload::Concatenation { ref inputs } => json!({
                "operation": "concat",
                "inputs": inputs.iter().map(|r| r.location.as_str()).collect::<Vec<_>>(),
                "notify_url": request.callback_url,
            }),
            _ => {
                return Err(DispatchError::rejected(
                    None,
                    format!("media provider cannot run {}", request.stage),
                ))
            }
        };
        debug_assert!(matches!(
            request.stage,
            StageKind::MediaCombination | StageKind::Concatenation
        ));
        post_submit(&self.http, &self.config, body).await
    }
}

/// Client for the music generation provider.
pub struct MusicHttpClient {
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl MusicHttpClient {
    /// Creates a music client.
    pub fn new(config: HttpClientConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            http: config.build_http()?,
            config,
        })
    }
}

#[async_trait]
impl StageClient for MusicHttpClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let StagePayload::MusicGeneration { ref video } = request.payload else {
            return Err(DispatchError::rejected(
                None,
                format!("music provider cannot run {}", request.stage),
            ));
        };
        let body = json!({
            "video_url": video.location,
            "webhook": request.callback_url,
        });
        post_submit(&self.http, &self.config, body).await
    }
}
