use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadState {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl UploadState {
    /// `completed`, `failed` and `cancelled` end a run.
    ///
    /// `failed` can still go back to `queued` through an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Position of a chunked upload within its chunk sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// Number of chunks confirmed by the server.
    pub current_chunk: usize,
    pub total_chunks: usize,
}

/// Read-only snapshot of the whole queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total: usize,
    pub queued: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Dispatch loop has been started and the queue is not disposed.
    pub is_processing: bool,
    pub is_paused: bool,
    pub total_bytes: u64,
    pub total_bytes_uploaded: u64,
}

impl QueueStatus {
    /// Uploaded share of all registered bytes, 0-100.
    pub fn overall_progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.total_bytes_uploaded as f64 / self.total_bytes as f64 * 100.0
    }

    /// No task is queued or uploading.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.uploading == 0
    }
}
