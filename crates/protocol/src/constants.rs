use std::time::Duration;

/// Default number of uploads allowed in the `uploading` state at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default chunk size for chunked uploads (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Largest chunk a single request may carry (100 MiB).
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Files strictly larger than this switch to the chunked path (50 MiB).
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Automatic retries allowed per request before a task fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay fed to the backoff policy.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for any single backoff delay.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Fraction of the computed delay added as random jitter.
pub const DEFAULT_RETRY_JITTER: f64 = 0.3;

/// Time window used by the throughput estimator.
pub const SPEED_WINDOW: Duration = Duration::from_secs(2);

/// Path segment appended to the upload URL when no commit endpoint is set.
pub const FINALIZE_PATH: &str = "complete";

/// Multipart field names of the chunk contract.
pub mod fields {
    pub const FILE_ID: &str = "fileId";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_SIZE: &str = "fileSize";
    pub const CHUNK_SIZE: &str = "chunkSize";
    pub const CHUNK_CHECKSUM: &str = "chunkChecksum";
}
