//! Queue API errors.

use uplink_protocol::UploadState;

use crate::types::TaskId;

/// Misuse of the queue API.
///
/// Failures of individual uploads never show up here; they are recorded on
/// the task and reported through `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("upload not found: {0}")]
    NotFound(TaskId),

    #[error("upload {id} is {state:?}, expected {expected:?}")]
    InvalidState {
        id: TaskId,
        state: UploadState,
        expected: UploadState,
    },

    #[error("queue disposed")]
    Disposed,
}
