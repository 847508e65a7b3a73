use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uplink_protocol::constants::DEFAULT_CONCURRENCY;
use uplink_protocol::{ChunkProgress, UploadConfig, UploadState};
use uplink_transfer::{PickedFile, UploadError};

/// Unique identifier of an upload task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(format!("upload_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Queue construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOptions {
    /// Maximum tasks in `uploading` at once. Zero is treated as one.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl QueueOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

/// Point-in-time copy of one task.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: PickedFile,
    pub config: Arc<UploadConfig>,
    pub state: UploadState,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// Starts at 1, incremented by each explicit retry.
    pub attempt: u32,
    /// Automatic retries of transient failures, across all attempts.
    pub retry_count: u32,
    pub error: Option<UploadError>,
    /// Set for tasks on the chunked path.
    pub chunk_progress: Option<ChunkProgress>,
    /// Server-side reassembly key, assigned on the first chunked dispatch.
    pub file_id: Option<String>,
    /// Current throughput in bytes per second.
    pub speed: f64,
    pub eta: Option<Duration>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Parsed body of the final successful response.
    pub response: Option<serde_json::Value>,
}

impl UploadTask {
    pub fn is_chunked(&self) -> bool {
        self.chunk_progress.is_some()
    }

    /// Uploaded share of the file, 0-100. Empty files count as done only
    /// once completed.
    pub fn percentage(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.state == UploadState::Completed { 100.0 } else { 0.0 };
        }
        self.bytes_uploaded as f64 / self.bytes_total as f64 * 100.0
    }
}

/// Outcome of a task that reached `completed` or `failed`.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub id: TaskId,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response: Option<serde_json::Value>,
    pub error: Option<UploadError>,
    pub task: UploadTask,
}
