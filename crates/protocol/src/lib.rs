//! Shared data model for the uplink upload engine.
//!
//! Plain serde types with no runtime dependencies, consumed by the transfer
//! algorithms, the queue, the HTTP executor and the CLI.

pub mod config;
pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use config::{HttpMethod, RetryStrategy, UploadConfig};
pub use types::{ChunkProgress, QueueStatus, UploadState};
