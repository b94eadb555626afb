//! Scribesync - transcription orchestration and synchronized subtitle
//! playback.
//!
//! The engine takes registered audio files through an external speech-to-text
//! provider under a bounded-concurrency job queue with retry and
//! cancellation, persists transcripts and their segments transactionally,
//! enriches segments best-effort (translation, annotations, phonetic
//! reading), and maps a playback clock onto the stored segments for
//! subtitle display and A/B loop playback.

pub mod database;
pub mod enrich;
pub mod error;
pub mod playback;
pub mod provider;
pub mod worker;

pub use database::Database;
pub use error::{EngineError, Result};
pub use playback::ab_loop::{LoopController, LoopRange};
pub use playback::{SubtitleSynchronizer, SubtitleWindow, SyncConfig};
pub use worker::{
    JobContext, JobRunner, JobStatus, PipelineOptions, ProgressStore, RetryPolicy, StatusEvent,
    TranscriptionOutcome, TranscriptionPipeline, TranscriptionQueue,
};
