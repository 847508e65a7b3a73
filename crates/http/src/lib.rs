//! HTTP transport for the upload queue.
//!
//! [`HttpExecutor`] implements [`uplink_queue::TransferExecutor`] on top of
//! `reqwest`. It sends exactly what the queue asks for; retries, timeouts and
//! status classification stay in the queue.

pub mod error;
pub mod executor;

pub use error::HttpError;
pub use executor::{FRAME_SIZE, HttpExecutor};
