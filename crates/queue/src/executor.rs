//! Transfer executor trait and request types.
//!
//! The executor performs exactly one network request. Retries, timeouts,
//! status classification and task bookkeeping all stay in the queue, so a
//! host only has to move bytes.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uplink_protocol::HttpMethod;
use uplink_transfer::UploadError;

/// Channel on which an executor reports cumulative body bytes written.
///
/// Reports are advisory; executors should use `try_send` and drop a report
/// when the channel is full.
pub type ProgressSender = mpsc::Sender<u64>;

/// Boxed future returned by [`TransferExecutor::send`].
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransferResponse, UploadError>> + Send + 'a>>;

/// Performs single upload requests on behalf of the queue.
///
/// Implementations return `Err` only when no response was received
/// (transport failure, cancellation). Any HTTP status, including 4xx and
/// 5xx, is returned as `Ok` and classified by the caller.
pub trait TransferExecutor: Send + Sync {
    fn send(
        &self,
        request: TransferRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> SendFuture<'_>;
}

/// What a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Whole file in one request.
    Direct,
    /// One chunk of a chunked upload.
    Chunk { index: usize, total: usize },
    /// Commit request after the last chunk.
    Finalize,
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `multipart/form-data` with one file part followed by text fields.
    Multipart {
        field_name: String,
        file_name: String,
        mime_type: String,
        data: Bytes,
        fields: Vec<(String, String)>,
    },
    /// Raw bytes with an explicit content type.
    Raw { content_type: String, data: Bytes },
    /// JSON document.
    Json(serde_json::Value),
}

impl RequestBody {
    /// Size of the file payload, excluding form fields and framing.
    pub fn payload_len(&self) -> u64 {
        match self {
            Self::Multipart { data, .. } | Self::Raw { data, .. } => data.len() as u64,
            Self::Json(_) => 0,
        }
    }

    /// Text field `name` of a multipart body.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Multipart { fields, .. } => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// One request handed to a [`TransferExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub kind: RequestKind,
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Caller allows the transfer to outlive foreground focus.
    pub background: bool,
}

/// Response to a [`TransferRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransferResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, falling back to a string; `Null` when empty.
    pub fn json(&self) -> serde_json::Value {
        if self.body.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(&self.body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.body).into_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_body_parsing() {
        let json = TransferResponse::new(200, r#"{"url":"https://cdn.test/a"}"#);
        assert_eq!(json.json()["url"], "https://cdn.test/a");

        let text = TransferResponse::new(201, "stored");
        assert_eq!(text.json(), serde_json::Value::String("stored".into()));

        assert_eq!(TransferResponse::new(204, "").json(), serde_json::Value::Null);
    }

    #[test]
    fn success_range() {
        assert!(TransferResponse::new(200, "").is_success());
        assert!(TransferResponse::new(299, "").is_success());
        assert!(!TransferResponse::new(304, "").is_success());
        assert!(!TransferResponse::new(500, "").is_success());
    }

    #[test]
    fn multipart_field_lookup() {
        let body = RequestBody::Multipart {
            field_name: "file".into(),
            file_name: "a.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: Bytes::from_static(b"abcd"),
            fields: vec![("chunkIndex".into(), "2".into())],
        };
        assert_eq!(body.field("chunkIndex"), Some("2"));
        assert_eq!(body.field("missing"), None);
        assert_eq!(body.payload_len(), 4);
    }
}
