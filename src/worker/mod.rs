pub mod pipeline;
pub mod progress;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use pipeline::{PipelineOptions, TranscriptionOutcome, TranscriptionPipeline};
pub use progress::{ProgressSnapshot, ProgressStore};
pub use retry::RetryPolicy;

/// Externally observable job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status-change notification, the only signal the queue/pipeline pair
/// emits. Delivered on the channel injected at queue construction.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub file_id: i64,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Everything a runner needs to execute one job. The token is a clone of
/// the handle returned from `enqueue`; runners check it at loop boundaries.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub file_id: i64,
    pub language: String,
    pub token: CancellationToken,
    pub created_at: DateTime<Utc>,
}

/// Job execution callback injected into the queue.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: JobContext) -> TranscriptionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Processing,
}

struct JobEntry {
    token: CancellationToken,
    language: String,
    created_at: DateTime<Utc>,
    state: JobState,
}

struct QueueInner {
    /// FIFO admission order of pending file ids.
    pending: VecDeque<i64>,
    /// Every live (pending or processing) job, keyed by file id.
    jobs: HashMap<i64, JobEntry>,
    running: usize,
}

/// Bounded-concurrency admission control over per-file transcription jobs.
///
/// Enqueue is idempotent per file id: while a job is pending or processing,
/// re-enqueueing returns the existing cancellation handle instead of
/// creating a duplicate. When a processing slot frees, the oldest pending
/// job is admitted. The queue persists nothing; its only side effects are
/// the injected status channel and the injected runner.
pub struct TranscriptionQueue {
    max_concurrent: usize,
    runner: Arc<dyn JobRunner>,
    events: mpsc::UnboundedSender<StatusEvent>,
    inner: Mutex<QueueInner>,
}

impl TranscriptionQueue {
    /// Transcription providers rate-limit aggressively, so jobs are
    /// serialized unless the caller raises the limit.
    pub const DEFAULT_CONCURRENCY: usize = 1;

    pub fn new(
        max_concurrent: usize,
        runner: Arc<dyn JobRunner>,
        events: mpsc::UnboundedSender<StatusEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            max_concurrent: max_concurrent.max(1),
            runner,
            events,
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                jobs: HashMap::new(),
                running: 0,
            }),
        })
    }

    /// Add a job for a file, returning its cancellation handle. If a job for
    /// this file is already pending or processing, the existing handle is
    /// returned and nothing else changes.
    pub fn enqueue(self: &Arc<Self>, file_id: i64, language: &str) -> CancellationToken {
        let token = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.jobs.get(&file_id) {
                log::debug!("File {} already queued, returning existing handle", file_id);
                return entry.token.clone();
            }

            let token = CancellationToken::new();
            inner.jobs.insert(
                file_id,
                JobEntry {
                    token: token.clone(),
                    language: language.to_string(),
                    created_at: Utc::now(),
                    state: JobState::Pending,
                },
            );
            inner.pending.push_back(file_id);
            token
        };

        self.notify(file_id, JobStatus::Pending, None);
        self.pump();
        token
    }

    /// Cancel a job. A pending job is removed immediately and reported
    /// cancelled; a processing job has its token signalled and reports its
    /// terminal status when the runner observes the cancellation. Returns
    /// false if no job for the file is live.
    pub fn cancel(&self, file_id: i64) -> bool {
        let was_pending = {
            let mut inner = self.inner.lock().unwrap();
            let state = match inner.jobs.get(&file_id) {
                Some(entry) => entry.state,
                None => return false,
            };
            match state {
                JobState::Pending => {
                    inner.jobs.remove(&file_id);
                    inner.pending.retain(|id| *id != file_id);
                    true
                }
                JobState::Processing => {
                    if let Some(entry) = inner.jobs.get(&file_id) {
                        entry.token.cancel();
                    }
                    false
                }
            }
        };

        if was_pending {
            self.notify(file_id, JobStatus::Cancelled, None);
        }
        true
    }

    /// Cancel every live job: pending jobs are dropped immediately,
    /// processing jobs are signalled.
    pub fn cancel_all(&self) {
        let dropped = {
            let mut inner = self.inner.lock().unwrap();
            let dropped: Vec<i64> = inner.pending.drain(..).collect();
            for file_id in &dropped {
                inner.jobs.remove(file_id);
            }
            for entry in inner.jobs.values() {
                entry.token.cancel();
            }
            dropped
        };

        for file_id in dropped {
            self.notify(file_id, JobStatus::Cancelled, None);
        }
    }

    /// Whether a job for this file is pending or processing.
    pub fn is_queued(&self, file_id: i64) -> bool {
        self.inner.lock().unwrap().jobs.contains_key(&file_id)
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().unwrap().running
    }

    /// Admit pending jobs while processing slots are free.
    fn pump(self: &Arc<Self>) {
        loop {
            let job = {
                let mut inner = self.inner.lock().unwrap();
                if inner.running >= self.max_concurrent {
                    break;
                }
                let file_id = match inner.pending.pop_front() {
                    Some(id) => id,
                    None => break,
                };
                let entry = match inner.jobs.get_mut(&file_id) {
                    Some(entry) => entry,
                    // Pending ids and job entries are removed together under
                    // this lock, but skipping is cheaper than panicking.
                    None => continue,
                };
                entry.state = JobState::Processing;
                let job = JobContext {
                    file_id,
                    language: entry.language.clone(),
                    token: entry.token.clone(),
                    created_at: entry.created_at,
                };
                inner.running += 1;
                job
            };

            self.notify(job.file_id, JobStatus::Processing, None);

            let queue = Arc::clone(self);
            let runner = Arc::clone(&self.runner);
            tokio::spawn(async move {
                let file_id = job.file_id;
                let outcome = runner.run(job).await;
                queue.finish(file_id, &outcome);
            });
        }
    }

    /// Release the job's slot, report its terminal status, and admit the
    /// next pending job.
    fn finish(self: &Arc<Self>, file_id: i64, outcome: &TranscriptionOutcome) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.remove(&file_id);
            inner.running = inner.running.saturating_sub(1);
        }

        match outcome {
            TranscriptionOutcome::Success { segment_count, .. } => {
                log::info!(
                    "Transcription completed for file {} ({} segments)",
                    file_id,
                    segment_count
                );
                self.notify(file_id, JobStatus::Completed, None);
            }
            TranscriptionOutcome::Cancelled => {
                log::info!("Transcription cancelled for file {}", file_id);
                self.notify(file_id, JobStatus::Cancelled, None);
            }
            TranscriptionOutcome::Failed(e) => {
                log::error!("Transcription failed for file {}: {}", file_id, e);
                self.notify(file_id, JobStatus::Failed, Some(e.to_string()));
            }
        }

        self.pump();
    }

    fn notify(&self, file_id: i64, status: JobStatus, error: Option<String>) {
        let _ = self.events.send(StatusEvent {
            file_id,
            status,
            error,
        });
    }
}
