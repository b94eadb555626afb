use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for TranscriptStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for TranscriptStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A registered audio source. The payload itself lives on disk at `path`;
/// the pipeline reads it lazily when the job starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    pub path: String,
    pub language: String,
    pub created_at: String,
}

/// One transcription attempt's outcome for a file. At most one row per
/// file_id; re-transcription updates this row in place and replaces its
/// segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: i64,
    pub file_id: i64,
    pub status: TranscriptStatus,
    pub raw_text: String,
    pub language: String,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A stored, time-bounded unit of transcribed text with optional enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub transcript_id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub normalized_text: Option<String>,
    pub translation: Option<String>,
    pub annotations: Option<Vec<String>>,
    pub phonetic_reading: Option<String>,
    pub word_timestamps: Option<Vec<WordTimestamp>>,
}

/// A segment as produced by result normalization, before it has a row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub word_timestamps: Option<Vec<WordTimestamp>>,
}

/// Normalized output of a successful provider call, ready to persist.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub raw_text: String,
    pub language: String,
    pub duration_seconds: Option<f64>,
    pub segments: Vec<NewSegment>,
}

/// Partial enrichment update for one stored segment, matched by exact
/// (start_time, end_time) equality. Fields left `None` keep their stored
/// values, which makes re-applying the same payload a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentUpdate {
    pub start_time: f64,
    pub end_time: f64,
    pub normalized_text: Option<String>,
    pub translation: Option<String>,
    pub annotations: Option<Vec<String>>,
    pub phonetic_reading: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_files: i64,
    pub completed_transcripts: i64,
    pub failed_transcripts: i64,
    pub processing_transcripts: i64,
    pub total_segments: i64,
}
