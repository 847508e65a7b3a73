use uplink_transfer::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
}

impl From<HttpError> for UploadError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Http(e) if e.is_timeout() => UploadError::Timeout,
            HttpError::Http(e) if e.is_builder() => UploadError::Unknown(e.to_string()),
            HttpError::Http(e) => UploadError::Network(e.to_string()),
            other => UploadError::Unknown(other.to_string()),
        }
    }
}
