use thiserror::Error;

/// Typed error hierarchy for the transcription engine.
///
/// Classification happens once, at the provider/persistence boundary that
/// produced the error; downstream code (retry policy, queue, callers)
/// matches on the variant and never re-parses messages.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio source missing for file {0}")]
    SourceMissing(i64),

    #[error("transcription service error: {0}")]
    ProviderTransient(String),

    #[error("transcription rejected: {0}")]
    ProviderRejected(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("post-processing failed: {0}")]
    PostProcessing(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable code, persisted alongside the human-readable
    /// message so a frontend can branch without string matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceMissing(_) => "source_missing",
            Self::ProviderTransient(_) => "provider_transient",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::Persistence(_) => "persistence_failure",
            Self::PostProcessing(_) => "post_processing_failure",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

/// The database layer reports through anyhow; at the pipeline boundary its
/// failures become `Persistence` errors.
impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
