use regex::Regex;
use std::sync::Arc;

use crate::database::{Database, NewSegment, TranscriptionResult, WordTimestamp};
use crate::enrich::{EnrichmentRequest, EnrichmentService, PlainSegment};
use crate::error::{EngineError, Result};
use crate::provider::{ProviderResponse, TranscriptionProvider, TranscriptionRequest};

use super::progress::ProgressStore;
use super::retry::RetryPolicy;
use super::{JobContext, JobRunner, JobStatus};

/// How many word-level timestamps are grouped into one synthesized segment
/// when the provider returns words but no segments.
const WORDS_PER_SEGMENT: usize = 10;

/// Terminal result of running one job through the pipeline. `Cancelled` is
/// deliberately not an error so callers can skip error handling for it.
#[derive(Debug)]
pub enum TranscriptionOutcome {
    Success {
        transcript_id: i64,
        segment_count: usize,
    },
    Cancelled,
    Failed(EngineError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub retry: RetryPolicy,
    pub words_per_segment: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            words_per_segment: WORDS_PER_SEGMENT,
        }
    }
}

/// Drives one transcription job end to end: load the audio source, call the
/// provider inside the retry loop, normalize the result into ordered
/// segments, persist transcript and segments in one transaction, then kick
/// off best-effort enrichment.
pub struct TranscriptionPipeline {
    db: Arc<Database>,
    provider: Arc<dyn TranscriptionProvider>,
    enricher: Option<Arc<dyn EnrichmentService>>,
    progress: Arc<ProgressStore>,
    options: PipelineOptions,
}

impl TranscriptionPipeline {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn TranscriptionProvider>,
        enricher: Option<Arc<dyn EnrichmentService>>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            db,
            provider,
            enricher,
            progress,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn process(&self, job: &JobContext) -> TranscriptionOutcome {
        let file_id = job.file_id;
        match self.execute(job).await {
            Ok((transcript_id, segment_count)) => {
                self.progress
                    .update(file_id, JobStatus::Completed, 100, "completed", None);
                TranscriptionOutcome::Success {
                    transcript_id,
                    segment_count,
                }
            }
            Err(EngineError::Cancelled) => {
                // Revert to pending so a retry is indistinguishable from a
                // fresh attempt.
                if let Err(e) = self.db.reset_transcript_pending(file_id) {
                    log::warn!("Failed to reset cancelled transcript {}: {}", file_id, e);
                }
                self.progress
                    .update(file_id, JobStatus::Cancelled, 0, "cancelled", None);
                TranscriptionOutcome::Cancelled
            }
            Err(e) => {
                if let Err(db_err) = self.db.mark_transcript_failed(file_id, &e.to_string()) {
                    log::error!("Failed to mark transcript {} failed: {}", file_id, db_err);
                }
                self.progress.update(
                    file_id,
                    JobStatus::Failed,
                    0,
                    "failed",
                    Some(e.to_string()),
                );
                TranscriptionOutcome::Failed(e)
            }
        }
    }

    async fn execute(&self, job: &JobContext) -> Result<(i64, usize)> {
        let file_id = job.file_id;

        self.progress
            .update(file_id, JobStatus::Processing, 0, "loading audio", None);

        let media = self
            .db
            .get_media_file(file_id)?
            .ok_or(EngineError::SourceMissing(file_id))?;
        let audio = tokio::fs::read(&media.path)
            .await
            .map_err(|_| EngineError::SourceMissing(file_id))?;

        self.db.mark_transcript_processing(file_id)?;
        self.progress
            .update(file_id, JobStatus::Processing, 10, "transcribing", None);

        let response = self.transcribe_with_retry(job, &audio).await?;

        self.progress.update(
            file_id,
            JobStatus::Processing,
            60,
            "normalizing result",
            None,
        );
        let result = normalize_response(response, &job.language, self.options.words_per_segment)?;

        self.progress
            .update(file_id, JobStatus::Processing, 80, "saving", None);

        // The transactional save is synchronous SQLite work; run it on the
        // blocking pool so a large segment batch does not stall the runtime.
        let transcript_id = {
            let db = self.db.clone();
            let result = result.clone();
            let saved = tokio::task::spawn_blocking(move || {
                db.save_transcription_result(file_id, &result)
            })
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

            match saved {
                Ok(id) => id,
                Err(e) => {
                    match self.db.cleanup_partial(file_id) {
                        Ok(removed) if removed > 0 => {
                            log::warn!(
                                "Removed {} half-written segments for file {}",
                                removed,
                                file_id
                            )
                        }
                        Ok(_) => {}
                        Err(cleanup_err) => log::error!(
                            "Cleanup after failed save for file {} also failed: {}",
                            file_id,
                            cleanup_err
                        ),
                    }
                    return Err(EngineError::Persistence(e.to_string()));
                }
            }
        };

        log::info!(
            "Persisted transcript {} for file {} ({} segments)",
            transcript_id,
            file_id,
            result.segments.len()
        );

        // Enrichment is best-effort and detached; its failure never touches
        // the transcript's completed status.
        self.spawn_enrichment(transcript_id, file_id, &result);

        Ok((transcript_id, result.segments.len()))
    }

    /// Provider call bounded by the retry policy. The cancellation token is
    /// checked before every network call and during backoff sleeps, so a
    /// cancelled job never starts another attempt.
    async fn transcribe_with_retry(
        &self,
        job: &JobContext,
        audio: &[u8],
    ) -> Result<ProviderResponse> {
        let policy = &self.options.retry;
        let mut attempt = 0u32;

        loop {
            if job.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let request = TranscriptionRequest {
                audio: audio.to_vec(),
                language_hint: job.language.clone(),
            };
            match self.provider.transcribe(request).await {
                Ok(response) => return Ok(response),
                Err(e) if policy.is_retryable(&e) && attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    log::warn!(
                        "Transcription attempt {}/{} for file {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        policy.max_attempts,
                        job.file_id,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = job.token.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_enrichment(&self, transcript_id: i64, file_id: i64, result: &TranscriptionResult) {
        let enricher = match &self.enricher {
            Some(enricher) => Arc::clone(enricher),
            None => return,
        };
        let db = self.db.clone();
        let request = self.build_enrichment_request(result);

        tokio::spawn(async move {
            match enricher.enrich(request).await {
                Ok(response) => {
                    let updates: Vec<_> = response
                        .segments
                        .into_iter()
                        .map(|s| s.into_update())
                        .collect();
                    match db.apply_enrichment(transcript_id, &updates) {
                        Ok(matched) => log::info!(
                            "Applied enrichment to {}/{} segments of transcript {}",
                            matched,
                            updates.len(),
                            transcript_id
                        ),
                        Err(e) => log::warn!(
                            "Failed to apply enrichment for transcript {}: {}",
                            transcript_id,
                            e
                        ),
                    }
                }
                Err(e) => {
                    log::warn!("Enrichment failed for file {} (transcript stays completed): {}",
                        file_id, e);
                }
            }
        });
    }

    /// Re-run enrichment for an already-completed transcript. This is the
    /// manual path; automatic enrichment is never retried.
    pub async fn reprocess_enrichment(&self, file_id: i64) -> Result<usize> {
        let enricher = self.enricher.as_ref().ok_or_else(|| {
            EngineError::PostProcessing("no enrichment service configured".to_string())
        })?;

        let transcript = self.db.get_transcript_for_file(file_id)?.ok_or_else(|| {
            EngineError::PostProcessing(format!("no transcript for file {}", file_id))
        })?;
        if transcript.status != crate::database::TranscriptStatus::Completed {
            return Err(EngineError::PostProcessing(format!(
                "transcript for file {} is {}, not completed",
                file_id, transcript.status
            )));
        }

        let segments = self.db.get_segments(transcript.id)?;
        let request = EnrichmentRequest {
            segments: segments
                .iter()
                .map(|s| PlainSegment {
                    text: s.text.clone(),
                    start: s.start_time,
                    end: s.end_time,
                })
                .collect(),
            source_language: transcript.language.clone(),
            target_language: self.enrichment_target_language(),
            enable_annotations: self.setting_enabled("enable_annotations"),
            enable_phonetic_reading: self.setting_enabled("enable_phonetic_reading"),
        };

        let response = enricher.enrich(request).await?;
        let updates: Vec<_> = response
            .segments
            .into_iter()
            .map(|s| s.into_update())
            .collect();
        let matched = self.db.apply_enrichment(transcript.id, &updates)?;
        log::info!(
            "Re-applied enrichment to {}/{} segments of transcript {}",
            matched,
            updates.len(),
            transcript.id
        );
        Ok(matched)
    }

    fn build_enrichment_request(&self, result: &TranscriptionResult) -> EnrichmentRequest {
        EnrichmentRequest {
            segments: result
                .segments
                .iter()
                .map(|s| PlainSegment {
                    text: s.text.clone(),
                    start: s.start_time,
                    end: s.end_time,
                })
                .collect(),
            source_language: result.language.clone(),
            target_language: self.enrichment_target_language(),
            enable_annotations: self.setting_enabled("enable_annotations"),
            enable_phonetic_reading: self.setting_enabled("enable_phonetic_reading"),
        }
    }

    fn enrichment_target_language(&self) -> String {
        self.db
            .get_setting("target_language")
            .unwrap_or(None)
            .unwrap_or_else(|| "en".to_string())
    }

    fn setting_enabled(&self, key: &str) -> bool {
        self.db
            .get_setting(key)
            .unwrap_or(None)
            .map(|v| v == "true")
            .unwrap_or(true)
    }
}

#[async_trait::async_trait]
impl JobRunner for TranscriptionPipeline {
    async fn run(&self, job: JobContext) -> TranscriptionOutcome {
        self.process(&job).await
    }
}

// =============================================================================
// Result normalization
// =============================================================================

/// Shape a provider response into an ordered segment list using the
/// three-tier fallback: provider segments, then synthesized word buckets,
/// then sentence-split plain text with the duration divided evenly.
fn normalize_response(
    response: ProviderResponse,
    language_hint: &str,
    words_per_segment: usize,
) -> Result<TranscriptionResult> {
    let language = response
        .detected_language
        .clone()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| language_hint.to_string());
    let duration_seconds = response.duration_seconds;

    let mut segments = if let Some(provider_segments) =
        response.segments.as_ref().filter(|s| !s.is_empty())
    {
        provider_segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| NewSegment {
                start_time: s.start,
                end_time: s.end,
                text: s.text.trim().to_string(),
                word_timestamps: s.words.as_ref().map(|words| {
                    words
                        .iter()
                        .map(|w| WordTimestamp {
                            word: w.word.clone(),
                            start: w.start,
                            end: w.end,
                        })
                        .collect()
                }),
            })
            .collect()
    } else if let Some(words) = response.words.as_ref().filter(|w| !w.is_empty()) {
        segments_from_words(words, words_per_segment.max(1))
    } else if let Some(text) = response.text.as_ref().filter(|t| !t.trim().is_empty()) {
        segments_from_text(text, duration_seconds)
    } else {
        return Err(EngineError::ProviderTransient(
            "provider returned no segments, words, or text".to_string(),
        ));
    };

    segments.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let raw_text = match response.text.as_ref().filter(|t| !t.trim().is_empty()) {
        Some(text) => text.trim().to_string(),
        None => segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    };

    Ok(TranscriptionResult {
        raw_text,
        language,
        duration_seconds,
        segments,
    })
}

/// Group word-level timestamps into fixed-size buckets.
fn segments_from_words(
    words: &[crate::provider::ProviderWord],
    words_per_segment: usize,
) -> Vec<NewSegment> {
    words
        .chunks(words_per_segment)
        .filter_map(|bucket| {
            let first = bucket.first()?;
            let last = bucket.last()?;
            let text = bucket
                .iter()
                .map(|w| w.word.trim())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            Some(NewSegment {
                start_time: first.start,
                end_time: last.end,
                text,
                word_timestamps: Some(
                    bucket
                        .iter()
                        .map(|w| WordTimestamp {
                            word: w.word.clone(),
                            start: w.start,
                            end: w.end,
                        })
                        .collect(),
                ),
            })
        })
        .collect()
}

/// Sentence-split plain text and divide the total duration evenly across the
/// sentences. Without a usable duration each sentence gets a nominal second
/// so the start < end invariant still holds.
fn segments_from_text(text: &str, duration_seconds: Option<f64>) -> Vec<NewSegment> {
    let sentence_re = Regex::new(r"[^.!?。！？]+[.!?。！？]*").unwrap();
    let sentences: Vec<String> = sentence_re
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let sentences = if sentences.is_empty() {
        vec![text.trim().to_string()]
    } else {
        sentences
    };

    let count = sentences.len() as f64;
    let total = match duration_seconds {
        Some(d) if d > 0.0 => d,
        _ => count,
    };
    let step = total / count;

    sentences
        .into_iter()
        .enumerate()
        .map(|(i, sentence)| NewSegment {
            start_time: i as f64 * step,
            end_time: (i + 1) as f64 * step,
            text: sentence,
            word_timestamps: None,
        })
        .collect()
}
