use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::JobStatus;

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Last-known progress for one file, as handed to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
}

struct ProgressEntry {
    snapshot: ProgressSnapshot,
    updated_at: Instant,
}

/// Process-wide map from file id to last-known progress. Entries expire
/// after the TTL so finished or abandoned jobs do not accumulate forever.
/// Constructed once per process and injected into the pipeline and any
/// pollers; readers poll, there is no push channel.
pub struct ProgressStore {
    ttl: Duration,
    inner: Mutex<HashMap<i64, ProgressEntry>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn update(
        &self,
        file_id: i64,
        status: JobStatus,
        progress: u8,
        message: &str,
        error: Option<String>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            file_id,
            ProgressEntry {
                snapshot: ProgressSnapshot {
                    status,
                    progress: progress.min(100),
                    message: message.to_string(),
                    error,
                },
                updated_at: Instant::now(),
            },
        );
    }

    /// Latest snapshot for a file, or `None` if absent or expired. Expired
    /// entries are dropped on the way out.
    pub fn get(&self, file_id: i64) -> Option<ProgressSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(&file_id) {
            Some(entry) if entry.updated_at.elapsed() < self.ttl => {
                Some(entry.snapshot.clone())
            }
            Some(_) => {
                inner.remove(&file_id);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, file_id: i64) {
        self.inner.lock().unwrap().remove(&file_id);
    }

    /// Drop every expired entry. Callers with long-lived stores can run this
    /// periodically; `get` also purges lazily.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, entry| entry.updated_at.elapsed() < self.ttl);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}
