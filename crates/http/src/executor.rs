use std::io;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uplink_protocol::HttpMethod;
use uplink_queue::{
    ProgressSender, RequestBody, SendFuture, TransferExecutor, TransferRequest, TransferResponse,
};
use uplink_transfer::UploadError;

use crate::error::HttpError;

/// Size of the frames a file payload is streamed in.
pub const FRAME_SIZE: usize = 64 * 1024;

const USER_AGENT: &str = concat!("uplink/", env!("CARGO_PKG_VERSION"));

/// [`TransferExecutor`] over a shared `reqwest` client.
///
/// Payloads are streamed in [`FRAME_SIZE`] frames and every frame handed to
/// the connection is reported as cumulative bytes on the progress channel.
/// The `background` flag has no meaning for a desktop process and is ignored.
#[derive(Clone)]
pub struct HttpExecutor {
    http: Client,
}

impl HttpExecutor {
    pub fn new() -> Result<Self, HttpError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client, keeping its pool and TLS settings.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn build(
        &self,
        request: TransferRequest,
        progress: ProgressSender,
    ) -> Result<RequestBuilder, HttpError> {
        let builder = self
            .http
            .request(method(request.method), &request.url)
            .headers(header_map(&request.headers)?);

        let builder = match request.body {
            RequestBody::Multipart {
                field_name,
                file_name,
                mime_type,
                data,
                fields,
            } => {
                let len = data.len() as u64;
                let part = Part::stream_with_length(Body::wrap_stream(framed(data, progress)), len)
                    .file_name(file_name)
                    .mime_str(&mime_type)
                    .map_err(|_| HttpError::InvalidContentType(mime_type.clone()))?;
                let form = fields
                    .into_iter()
                    .fold(Form::new().part(field_name, part), |form, (key, value)| {
                        form.text(key, value)
                    });
                builder.multipart(form)
            }
            RequestBody::Raw { content_type, data } => {
                let value = HeaderValue::from_str(&content_type)
                    .map_err(|_| HttpError::InvalidContentType(content_type.clone()))?;
                let len = data.len();
                builder
                    .header(CONTENT_TYPE, value)
                    .header(reqwest::header::CONTENT_LENGTH, len)
                    .body(Body::wrap_stream(framed(data, progress)))
            }
            RequestBody::Json(value) => builder.json(&value),
        };
        Ok(builder)
    }
}

impl TransferExecutor for HttpExecutor {
    fn send(
        &self,
        request: TransferRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> SendFuture<'_> {
        Box::pin(async move {
            let kind = request.kind;
            let url = request.url.clone();
            trace!(?kind, url = %url, background = request.background, "sending request");

            let builder = self.build(request, progress)?;
            let exchange = async {
                let resp = builder.send().await?;
                let status = resp.status().as_u16();
                let body = resp.bytes().await?;
                Ok::<_, HttpError>(TransferResponse { status, body })
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(?kind, url = %url, "request aborted");
                    Err(UploadError::Cancelled)
                }
                result = exchange => {
                    let response = result?;
                    debug!(?kind, url = %url, status = response.status, "response received");
                    Ok(response)
                }
            }
        })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || HttpError::InvalidHeader { name: name.clone() };
        let key = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.append(key, value);
    }
    Ok(map)
}

/// Splits `data` into frames, reporting the running total as each frame is
/// pulled by the connection.
fn framed(
    data: Bytes,
    progress: ProgressSender,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Sync + 'static {
    let total = data.len();
    let frames = (0..total).step_by(FRAME_SIZE).map(move |start| {
        let end = (start + FRAME_SIZE).min(total);
        let _ = progress.try_send(end as u64);
        Ok(data.slice(start..end))
    });
    stream::iter(frames)
}
