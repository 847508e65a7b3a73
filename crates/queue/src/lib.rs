//! Upload queue with concurrency-bounded dispatch and chunked transfers.
//!
//! This crate holds the **scheduling** side of uploads. It has no network
//! code of its own: the host supplies a [`TransferExecutor`] that performs
//! single requests, and the queue decides what to send, when, and what to
//! do with the outcome.
//!
//! # Flow
//!
//! 1. **Add** - files become `queued` tasks; the direct or chunked route
//!    is fixed per task
//! 2. **Dispatch** - oldest queued tasks start while slots are free
//! 3. **Transfer** - one request (direct) or ordered chunks plus a commit
//!    (chunked), retrying transient failures with backoff
//! 4. **Settle** - the task ends `completed`, `failed` or `cancelled`, its
//!    slot frees and dispatch runs again

pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod types;
pub mod uploader;

// Re-export primary types for convenience.
pub use error::QueueError;
pub use events::Subscription;
pub use executor::{
    ProgressSender, RequestBody, RequestKind, SendFuture, TransferExecutor, TransferRequest,
    TransferResponse,
};
pub use queue::UploadQueue;
pub use types::{QueueOptions, TaskId, UploadResult, UploadTask};
pub use uploader::{ChunkedUploader, RequestRunner, UploadObserver, upload_direct};
