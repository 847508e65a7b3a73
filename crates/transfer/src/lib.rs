//! Transfer algorithms shared by the upload queue.
//!
//! Everything here is either pure (backoff, chunk planning, formatting) or
//! owns a single piece of state (throughput window, file source). Nothing
//! in this crate schedules work.

mod backoff;
mod chunked;
mod error;
mod file;
mod format;
mod progress;

pub use backoff::{BackoffPolicy, is_retryable_error, next_delay};
pub use chunked::{
    Chunk, checksum_bytes, chunk_at, chunk_count, confirmed_bytes, plan_chunks,
    should_use_chunked_upload,
};
pub use error::UploadError;
pub use file::{FileSource, MemorySource, PathSource, PickedFile, ReadFuture};
pub use format::{ParseSizeError, format_bytes, format_duration, parse_size};
pub use progress::{SpeedCalculator, calculate_eta};
