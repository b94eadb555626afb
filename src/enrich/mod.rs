//! Post-processing enrichment integration.
//!
//! After a transcription is persisted, its plain-text segments are sent to
//! an enrichment service that returns normalized text, a translation,
//! annotations, and a phonetic reading per time range. The service must echo
//! each segment's (start, end) unmodified; those values are the join key
//! back to the stored rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::SegmentUpdate;
use crate::error::{EngineError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub segments: Vec<PlainSegment>,
    pub source_language: String,
    pub target_language: String,
    pub enable_annotations: bool,
    pub enable_phonetic_reading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub normalized_text: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub annotations: Option<Vec<String>>,
    #[serde(default)]
    pub phonetic_reading: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    pub segments: Vec<EnrichedSegment>,
}

impl EnrichedSegment {
    pub fn into_update(self) -> SegmentUpdate {
        SegmentUpdate {
            start_time: self.start,
            end_time: self.end,
            normalized_text: self.normalized_text,
            translation: self.translation,
            annotations: self.annotations,
            phonetic_reading: self.phonetic_reading,
        }
    }
}

/// Seam for enrichment implementations.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn enrich(&self, request: EnrichmentRequest) -> Result<EnrichmentResponse>;
}

/// HTTP enrichment client posting the segment batch as JSON.
pub struct HttpEnrichmentService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEnrichmentService {
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
impl EnrichmentService for HttpEnrichmentService {
    async fn enrich(&self, request: EnrichmentRequest) -> Result<EnrichmentResponse> {
        let url = format!("{}/v1/enrich", self.base_url);

        log::info!(
            "Sending enrichment request: {} segments, {} -> {}",
            request.segments.len(),
            request.source_language,
            request.target_language
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::PostProcessing(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::PostProcessing(format!(
                "enrichment service returned {}: {}",
                status, body
            )));
        }

        let parsed: EnrichmentResponse = response
            .json()
            .await
            .map_err(|e| EngineError::PostProcessing(format!("invalid response body: {}", e)))?;

        log::info!("Enrichment response: {} segments", parsed.segments.len());

        Ok(parsed)
    }
}
