//! Transcription provider integration.
//!
//! The speech-to-text service is opaque to the engine: it receives an audio
//! payload plus a language hint and answers with text, a detected language,
//! a duration, and whatever timing granularity it supports (segment-level,
//! word-level, or none). The pipeline copes with any subset being present.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Request to the transcription service.
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    /// ISO 639-1 code, or "auto" for provider-side detection.
    pub language_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<ProviderWord>>,
}

/// Response from the transcription service. Every field is optional except
/// `text`; capability varies per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub segments: Option<Vec<ProviderSegment>>,
    #[serde(default)]
    pub words: Option<Vec<ProviderWord>>,
}

/// Seam for transcription implementations. Errors must already be classified
/// into `ProviderTransient` / `ProviderRejected` when they cross this
/// boundary; the retry policy decides from the variant alone.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<ProviderResponse>;
}

/// HTTP transcription client. Posts the raw audio body with the language
/// hint as a query parameter and parses the JSON response.
pub struct HttpTranscriptionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTranscriptionProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<ProviderResponse> {
        let url = format!("{}/v1/transcribe", self.base_url);

        log::info!(
            "Sending transcription request: {} bytes, language hint '{}'",
            request.audio.len(),
            request.language_hint
        );

        let mut builder = self
            .client
            .post(&url)
            .query(&[("language", request.language_hint.as_str())])
            .header("content-type", "application/octet-stream")
            .body(request.audio);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProviderTransient(format!("invalid response body: {}", e)))?;

        log::info!(
            "Transcription response: {} segments, {} words, language {:?}",
            parsed.segments.as_ref().map_or(0, |s| s.len()),
            parsed.words.as_ref().map_or(0, |w| w.len()),
            parsed.detected_language
        );

        Ok(parsed)
    }
}

/// Transport-level failures (connect, timeout) are transient by definition.
fn classify_request_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        EngineError::ProviderTransient(e.to_string())
    } else {
        EngineError::ProviderRejected(e.to_string())
    }
}

/// 5xx responses are transient server trouble; 4xx means the request itself
/// was refused and retrying the same payload cannot help.
fn classify_status(status: reqwest::StatusCode, body: &str) -> EngineError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status.is_server_error() {
        EngineError::ProviderTransient(detail)
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        EngineError::ProviderRejected(format!("invalid or missing credentials ({})", detail))
    } else {
        EngineError::ProviderRejected(detail)
    }
}
