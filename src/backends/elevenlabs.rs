//! ElevenLabs text-to-speech client.
//!
//! The cloud primary. Speaks the minimal REST contract:
//! `POST /v1/text-to-speech/{voice_id}` (or `/stream`) with the output
//! format as a query parameter and the voice settings in the JSON body.
//! See: <https://elevenlabs.io/docs/api-reference/text-to-speech>

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use super::SpeechBackend;
use crate::types::{AudioStream, QuotaUsage, SynthesisRequest};
use crate::{Result, SkaldError};

/// Default base URL for the ElevenLabs API
const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// Default synthesis model.
pub const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

/// Backend id reported by [`ElevenLabsClient`].
pub const ELEVENLABS_BACKEND: &str = "elevenlabs";

/// Client for the ElevenLabs text-to-speech API.
#[derive(Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    model_id: String,
    http: Client,
    base_url: String,
}

impl ElevenLabsClient {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        // The orchestrator enforces the per-request timeout; this one only
        // bounds connection setup.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key: api_key.into(),
            model_id: DEFAULT_MODEL.to_string(),
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Use a different synthesis model.
    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            SkaldError::Configuration(format!("invalid ElevenLabs base URL '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                SkaldError::Configuration(format!(
                    "ElevenLabs base URL '{}' cannot take a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_synthesis(
        &self,
        request: &SynthesisRequest,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        if request.voice_id().is_empty() {
            return Err(SkaldError::InvalidInput("voice id is empty".to_string()));
        }

        let mut segments = vec!["v1", "text-to-speech", request.voice_id()];
        if streaming {
            segments.push("stream");
        }
        let url = self.endpoint(&segments)?;
        let settings = request.settings();

        let response = self
            .http
            .post(url)
            .header("xi-api-key", &self.api_key)
            .query(&[("output_format", settings.format.as_str())])
            .json(&TtsRequest {
                text: request.text(),
                model_id: &self.model_id,
                voice_settings: VoiceSettings {
                    stability: settings.stability,
                    similarity_boost: settings.similarity,
                    style: settings.style,
                    speed: settings.speed,
                },
            })
            .send()
            .await?;

        check_status(response).await
    }
}

/// Map non-success statuses to errors, passing successful responses through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(SkaldError::AuthenticationFailed),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(SkaldError::RateLimited { retry_after })
        }
        code => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(ErrorBody::message)
                .unwrap_or_else(|| format!("ElevenLabs API error: {status}"));
            Err(SkaldError::Api {
                status: code,
                message,
            })
        }
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    speed: f32,
}

#[derive(Deserialize)]
struct SubscriptionResponse {
    character_count: u64,
    character_limit: u64,
}

/// `{"detail": "..."}` or `{"detail": {"message": "..."}}`
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl ErrorBody {
    fn message(self) -> Option<String> {
        match self.detail {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

#[async_trait]
impl SpeechBackend for ElevenLabsClient {
    fn name(&self) -> &str {
        ELEVENLABS_BACKEND
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let response = self.post_synthesis(request, false).await?;
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SkaldError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }

    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream> {
        let response = self.post_synthesis(request, true).await?;
        let stream = response
            .bytes_stream()
            .filter(|chunk| futures_util::future::ready(!matches!(chunk, Ok(b) if b.is_empty())))
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| SkaldError::Stream(e.to_string()))
            });
        Ok(Box::pin(stream))
    }

    async fn is_reachable(&self) -> bool {
        let Ok(url) = self.endpoint(&["v1", "models"]) else {
            return false;
        };
        match self
            .http
            .get(url)
            .header("xi-api-key", &self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn usage(&self) -> Result<QuotaUsage> {
        let url = self.endpoint(&["v1", "user", "subscription"])?;
        let response = self
            .http
            .get(url)
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        let subscription: SubscriptionResponse = check_status(response).await?.json().await?;
        Ok(QuotaUsage {
            characters_used: subscription.character_count,
            characters_limit: subscription.character_limit,
        })
    }
}
