//! Per-task error taxonomy.

/// Why a single upload request (or a whole task) failed.
///
/// Cloneable so task snapshots can carry the last error; lower-level
/// errors are flattened to their messages on conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("rate limited: HTTP 429")]
    RateLimited,

    #[error("request rejected: HTTP {status}")]
    Validation { status: u16 },

    #[error("cancelled")]
    Cancelled,

    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<UploadError>,
    },

    #[error("finalize failed: {source}")]
    Finalize {
        #[source]
        source: Box<UploadError>,
    },

    #[error("failed to read file: {0}")]
    Read(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl UploadError {
    /// Maps a non-success HTTP status to an error.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => Self::Timeout,
            429 => Self::RateLimited,
            400..=499 => Self::Validation { status },
            500..=599 => Self::Server { status },
            _ => Self::Unknown(format!("unexpected HTTP status {status}")),
        }
    }

    /// Wraps `self` as the failure of chunk `index`.
    pub fn in_chunk(self, index: usize) -> Self {
        Self::Chunk {
            index,
            source: Box::new(self),
        }
    }

    /// Wraps `self` as a failure of the commit request.
    pub fn in_finalize(self) -> Self {
        Self::Finalize {
            source: Box::new(self),
        }
    }

    /// HTTP status behind this error, looking through chunk/finalize wrappers.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status } | Self::Validation { status } => Some(*status),
            Self::RateLimited => Some(429),
            Self::Chunk { source, .. } | Self::Finalize { source } => source.status_code(),
            _ => None,
        }
    }

    /// Index of the failing chunk, if this came from the chunked path.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::Chunk { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Chunk { source, .. } | Self::Finalize { source } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Stable code for logs and serialized snapshots.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Server { .. } => "SERVER_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Cancelled => "ABORTED",
            Self::Chunk { .. } => "CHUNK_FAILED",
            Self::Finalize { .. } => "FINALIZE_FAILED",
            Self::Read(_) => "FILE_READ_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Read(err.to_string())
    }
}
