//! Direct and chunked upload runs for a single task.
//!
//! A run owns no task state. It drives executor calls, applies the per
//! attempt timeout and the retry policy, and reports what happened through
//! an [`UploadObserver`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uplink_protocol::constants::fields;
use uplink_protocol::{HttpMethod, UploadConfig};
use uplink_transfer::{
    BackoffPolicy, PickedFile, UploadError, checksum_bytes, chunk_at, chunk_count,
    confirmed_bytes, is_retryable_error,
};

use crate::executor::{RequestBody, RequestKind, TransferExecutor, TransferRequest, TransferResponse};

/// Buffered progress reports per request.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Receives progress from a run.
pub trait UploadObserver: Send + Sync {
    /// Cumulative bytes of the file sent so far, including confirmed chunks.
    fn bytes_sent(&self, bytes: u64);

    /// A request failed with a transient error and will be re-sent after
    /// `delay`. Progress falls back to `confirmed` bytes.
    fn retrying(&self, attempt: u32, error: &UploadError, delay: Duration, confirmed: u64);

    /// The server accepted chunk `index` of `total`.
    fn chunk_confirmed(&self, index: usize, total: usize);
}

/// Sends one request at a time with timeout, retry and cancellation.
pub struct RequestRunner<'a> {
    executor: &'a dyn TransferExecutor,
    config: &'a UploadConfig,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
}

impl<'a> RequestRunner<'a> {
    pub fn new(
        executor: &'a dyn TransferExecutor,
        config: &'a UploadConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            config,
            backoff: BackoffPolicy::from_config(config),
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// Sends `request` once. `on_bytes` receives the executor's cumulative
    /// byte reports for this request.
    async fn send_once(
        &self,
        request: TransferRequest,
        on_bytes: &mut (dyn FnMut(u64) + Send),
    ) -> Result<TransferResponse, UploadError> {
        self.check_cancelled()?;

        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let send = self.executor.send(request, tx, self.cancel.child_token());
        tokio::pin!(send);

        let timeout = self.config.timeout();
        let deadline = async {
            if timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = &mut deadline => return Err(UploadError::Timeout),
                Some(bytes) = rx.recv() => on_bytes(bytes),
                result = &mut send => break result,
            }
        };

        while let Ok(bytes) = rx.try_recv() {
            on_bytes(bytes);
        }

        let response = result?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(UploadError::from_status(response.status))
        }
    }

    /// Sends `request`, retrying transient failures with backoff.
    ///
    /// `base` is the file offset of the request payload; byte reports are
    /// shifted by it and clamped to `payload_len`.
    async fn send_with_retry(
        &self,
        request: TransferRequest,
        base: u64,
        observer: &dyn UploadObserver,
    ) -> Result<TransferResponse, UploadError> {
        let max_retries = self.config.effective_max_retries();
        let payload_len = request.body.payload_len();
        let mut attempt: u32 = 0;

        loop {
            let mut on_bytes = |written: u64| observer.bytes_sent(base + written.min(payload_len));
            match self.send_once(request.clone(), &mut on_bytes).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < max_retries && is_retryable_error(&e) => {
                    attempt += 1;
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        url = %request.url,
                        kind = ?request.kind,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    observer.retrying(attempt, &e, delay, base);

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn form_fields(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.config
            .form_data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// Uploads `file` in a single request.
pub async fn upload_direct(
    runner: &RequestRunner<'_>,
    file: &PickedFile,
    observer: &dyn UploadObserver,
) -> Result<TransferResponse, UploadError> {
    runner.check_cancelled()?;
    let data = file.read_all().await?;
    let config = runner.config;

    let body = if config.multipart {
        RequestBody::Multipart {
            field_name: config.field_name.clone(),
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            data,
            fields: runner.form_fields().collect(),
        }
    } else {
        RequestBody::Raw {
            content_type: file.mime_type.clone(),
            data,
        }
    };

    let request = TransferRequest {
        kind: RequestKind::Direct,
        url: config.url.clone(),
        method: config.method,
        headers: runner.headers(),
        body,
        background: config.background_upload,
    };

    debug!(file = %file.name, size = file.size, url = %config.url, "direct upload");
    runner.send_with_retry(request, 0, observer).await
}

/// Uploads one file as an ordered chunk sequence followed by a commit.
pub struct ChunkedUploader<'a> {
    runner: &'a RequestRunner<'a>,
    file: &'a PickedFile,
    file_id: &'a str,
    chunk_size: u64,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(runner: &'a RequestRunner<'a>, file: &'a PickedFile, file_id: &'a str) -> Self {
        Self {
            runner,
            file,
            file_id,
            chunk_size: runner.config.effective_chunk_size(),
        }
    }

    pub fn total_chunks(&self) -> usize {
        chunk_count(self.file.size, self.chunk_size)
    }

    /// Sends chunks `start_chunk..` strictly in order, then the commit.
    ///
    /// With `start_chunk >= total_chunks` only the commit is sent. A chunk
    /// that keeps failing stops the run; later chunks are not attempted.
    pub async fn upload(
        &self,
        start_chunk: usize,
        observer: &dyn UploadObserver,
    ) -> Result<TransferResponse, UploadError> {
        let total = self.total_chunks();

        debug!(
            file = %self.file.name,
            file_id = %self.file_id,
            start_chunk,
            total_chunks = total,
            "chunked upload"
        );

        for index in start_chunk..total {
            self.runner.check_cancelled()?;
            self.upload_chunk(index, total, observer)
                .await
                .map_err(|e| if e.is_cancelled() { e } else { e.in_chunk(index) })?;
            observer.chunk_confirmed(index, total);
        }

        self.runner.check_cancelled()?;
        self.finalize(total, observer)
            .await
            .map_err(|e| if e.is_cancelled() { e } else { e.in_finalize() })
    }

    async fn upload_chunk(
        &self,
        index: usize,
        total: usize,
        observer: &dyn UploadObserver,
    ) -> Result<TransferResponse, UploadError> {
        let Some(chunk) = chunk_at(self.file.size, self.chunk_size, index) else {
            return Err(UploadError::Unknown(format!("chunk {index} out of range")));
        };
        let data = self.file.read_range(chunk.range()).await?;
        let config = self.runner.config;

        let mut fields = vec![
            (fields::FILE_ID.to_string(), self.file_id.to_string()),
            (fields::CHUNK_INDEX.to_string(), index.to_string()),
            (fields::TOTAL_CHUNKS.to_string(), total.to_string()),
            (fields::FILE_NAME.to_string(), self.file.name.clone()),
            (fields::FILE_SIZE.to_string(), self.file.size.to_string()),
            (fields::CHUNK_SIZE.to_string(), self.chunk_size.to_string()),
            (fields::CHUNK_CHECKSUM.to_string(), checksum_bytes(&data)),
        ];
        fields.extend(self.runner.form_fields());

        let request = TransferRequest {
            kind: RequestKind::Chunk { index, total },
            url: config.url.clone(),
            method: config.method,
            headers: self.runner.headers(),
            body: RequestBody::Multipart {
                field_name: config.field_name.clone(),
                file_name: self.file.name.clone(),
                mime_type: self.file.mime_type.clone(),
                data,
                fields,
            },
            background: config.background_upload,
        };

        debug!(file_id = %self.file_id, chunk = index, total, len = chunk.len, "sending chunk");
        self.runner
            .send_with_retry(request, chunk.offset, observer)
            .await
    }

    async fn finalize(
        &self,
        total: usize,
        observer: &dyn UploadObserver,
    ) -> Result<TransferResponse, UploadError> {
        let config = self.runner.config;
        let body = serde_json::json!({
            "fileId": self.file_id,
            "fileName": self.file.name,
            "fileSize": self.file.size,
            "fileType": self.file.mime_type,
            "totalChunks": total,
        });

        let request = TransferRequest {
            kind: RequestKind::Finalize,
            url: config.finalize_endpoint(),
            method: HttpMethod::Post,
            headers: self.runner.headers(),
            body: RequestBody::Json(body),
            background: config.background_upload,
        };

        debug!(file_id = %self.file_id, url = %request.url, "finalizing upload");
        let confirmed = confirmed_bytes(self.file.size, self.chunk_size, total);
        self.runner.send_with_retry(request, confirmed, observer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ProgressSender, SendFuture};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Bytes(u64),
        Retry(u32, u64),
        Chunk(usize),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Seen>>);

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.0.lock().unwrap().clone()
        }
    }

    impl UploadObserver for Recorder {
        fn bytes_sent(&self, bytes: u64) {
            self.0.lock().unwrap().push(Seen::Bytes(bytes));
        }
        fn retrying(&self, attempt: u32, _error: &UploadError, _delay: Duration, confirmed: u64) {
            self.0.lock().unwrap().push(Seen::Retry(attempt, confirmed));
        }
        fn chunk_confirmed(&self, index: usize, _total: usize) {
            self.0.lock().unwrap().push(Seen::Chunk(index));
        }
    }

    /// Scripted executor: pops one status per request (200 when empty),
    /// reporting the whole payload as written before answering.
    #[derive(Default)]
    struct MockExecutor {
        statuses: Mutex<VecDeque<Result<u16, UploadError>>>,
        requests: Mutex<Vec<TransferRequest>>,
    }

    impl MockExecutor {
        fn with(statuses: Vec<Result<u16, UploadError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<TransferRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl TransferExecutor for MockExecutor {
        fn send(
            &self,
            request: TransferRequest,
            progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> SendFuture<'_> {
            Box::pin(async move {
                let len = request.body.payload_len();
                self.requests.lock().unwrap().push(request);
                let _ = progress.try_send(len / 2);
                let _ = progress.try_send(len);
                let status = self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(200));
                status.map(|s| TransferResponse::new(s, r#"{"ok":true}"#))
            })
        }
    }

    fn config(chunk_size: u64) -> UploadConfig {
        UploadConfig {
            url: "https://upload.test/files".into(),
            chunk_size,
            retry_delay_ms: 10,
            retry_jitter: 0.0,
            ..UploadConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_multipart_request() {
        let exec = MockExecutor::default();
        let mut cfg = config(4);
        cfg.form_data.insert("album".into(), "trip".into());
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("photo.jpg", vec![1u8; 10]);
        let recorder = Recorder::default();

        let resp = upload_direct(&runner, &file, &recorder).await.unwrap();
        assert_eq!(resp.status, 200);

        let reqs = exec.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].kind, RequestKind::Direct);
        assert_eq!(reqs[0].body.field("album"), Some("trip"));
        match &reqs[0].body {
            RequestBody::Multipart { field_name, mime_type, .. } => {
                assert_eq!(field_name, "file");
                assert_eq!(mime_type, "image/jpeg");
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(recorder.seen(), vec![Seen::Bytes(5), Seen::Bytes(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_raw_body_when_not_multipart() {
        let exec = MockExecutor::default();
        let cfg = UploadConfig {
            multipart: false,
            ..config(4)
        };
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("doc.pdf", vec![0u8; 3]);

        upload_direct(&runner, &file, &Recorder::default()).await.unwrap();
        assert!(matches!(
            &exec.requests()[0].body,
            RequestBody::Raw { content_type, .. } if content_type == "application/pdf"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_sent_in_order_then_finalized() {
        let exec = MockExecutor::default();
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", (0u8..10).collect::<Vec<_>>());
        let uploader = ChunkedUploader::new(&runner, &file, "file_abc");
        let recorder = Recorder::default();

        uploader.upload(0, &recorder).await.unwrap();

        let reqs = exec.requests();
        assert_eq!(reqs.len(), 4);
        for (i, req) in reqs[..3].iter().enumerate() {
            assert_eq!(req.kind, RequestKind::Chunk { index: i, total: 3 });
            assert_eq!(req.body.field(fields::FILE_ID), Some("file_abc"));
            assert_eq!(req.body.field(fields::CHUNK_INDEX), Some(i.to_string().as_str()));
            assert_eq!(req.body.field(fields::TOTAL_CHUNKS), Some("3"));
        }
        // The field carries the configured size so the server can place
        // chunk `i` at `i * chunkSize`; only the payload is shorter.
        let sizes: Vec<_> = reqs[..3]
            .iter()
            .map(|r| r.body.field(fields::CHUNK_SIZE))
            .collect();
        assert_eq!(sizes, vec![Some("4"); 3]);
        assert_eq!(reqs[2].body.payload_len(), 2);

        assert_eq!(reqs[3].kind, RequestKind::Finalize);
        assert_eq!(reqs[3].url, "https://upload.test/files/complete");
        match &reqs[3].body {
            RequestBody::Json(v) => {
                assert_eq!(v["fileId"], "file_abc");
                assert_eq!(v["totalChunks"], 3);
                assert_eq!(v["fileSize"], 10);
            }
            other => panic!("unexpected body {other:?}"),
        }

        let chunks: Vec<_> = recorder
            .seen()
            .into_iter()
            .filter(|s| matches!(s, Seen::Chunk(_)))
            .collect();
        assert_eq!(chunks, vec![Seen::Chunk(0), Seen::Chunk(1), Seen::Chunk(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_checksum_matches_payload() {
        let exec = MockExecutor::default();
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", b"abcdefgh".to_vec());

        ChunkedUploader::new(&runner, &file, "f")
            .upload(0, &Recorder::default())
            .await
            .unwrap();

        let reqs = exec.requests();
        assert_eq!(
            reqs[1].body.field(fields::CHUNK_CHECKSUM),
            Some(checksum_bytes(b"efgh").as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_chunk_retried_alone() {
        let exec = MockExecutor::with(vec![Ok(200), Ok(503), Ok(200)]);
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", vec![0u8; 10]);
        let recorder = Recorder::default();

        ChunkedUploader::new(&runner, &file, "f")
            .upload(0, &recorder)
            .await
            .unwrap();

        let kinds: Vec<_> = exec.requests().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequestKind::Chunk { index: 0, total: 3 },
                RequestKind::Chunk { index: 1, total: 3 },
                RequestKind::Chunk { index: 1, total: 3 },
                RequestKind::Chunk { index: 2, total: 3 },
                RequestKind::Finalize,
            ]
        );
        // Rewound to the end of chunk 0, not to zero.
        assert!(recorder.seen().contains(&Seen::Retry(1, 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chunk_retries_fail_with_index() {
        let exec = MockExecutor::with(vec![Ok(200), Ok(500), Ok(500), Ok(500), Ok(500)]);
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", vec![0u8; 10]);

        let err = ChunkedUploader::new(&runner, &file, "f")
            .upload(0, &Recorder::default())
            .await
            .unwrap_err();

        assert_eq!(err.chunk_index(), Some(1));
        assert_eq!(err.status_code(), Some(500));
        // 1 + 1 initial and 3 retries; chunk 2 never attempted.
        assert_eq!(exec.requests().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_error_not_retried() {
        let exec = MockExecutor::with(vec![Ok(413)]);
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("a.bin", vec![0u8; 3]);

        let err = upload_direct(&runner, &file, &Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::Validation { status: 413 });
        assert_eq!(exec.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_disabled_sends_once() {
        let exec = MockExecutor::with(vec![Err(UploadError::Network("reset".into()))]);
        let cfg = UploadConfig {
            retry_enabled: false,
            ..config(4)
        };
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("a.bin", vec![0u8; 3]);

        let err = upload_direct(&runner, &file, &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Network(_)));
        assert_eq!(exec.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_past_last_chunk_only_finalizes() {
        let exec = MockExecutor::default();
        let cfg = config(4);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", vec![0u8; 10]);

        ChunkedUploader::new(&runner, &file, "f")
            .upload(3, &Recorder::default())
            .await
            .unwrap();

        let reqs = exec.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].kind, RequestKind::Finalize);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_failure_is_wrapped() {
        let exec = MockExecutor::with(vec![Ok(200), Ok(400)]);
        let cfg = config(8);
        let runner = RequestRunner::new(&exec, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("data.bin", vec![0u8; 8]);

        let err = ChunkedUploader::new(&runner, &file, "f")
            .upload(0, &Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FINALIZE_FAILED");
        assert_eq!(err.status_code(), Some(400));
    }

    /// Never answers; only the timeout or cancellation can end the call.
    struct HangingExecutor;

    impl TransferExecutor for HangingExecutor {
        fn send(
            &self,
            _request: TransferRequest,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> SendFuture<'_> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_retryable_timeout() {
        let cfg = UploadConfig {
            timeout_ms: 1_000,
            max_retries: 1,
            ..config(4)
        };
        let runner = RequestRunner::new(&HangingExecutor, &cfg, CancellationToken::new());
        let file = PickedFile::from_bytes("a.bin", vec![0u8; 3]);
        let recorder = Recorder::default();

        let err = upload_direct(&runner, &file, &recorder).await.unwrap_err();
        assert_eq!(err, UploadError::Timeout);
        assert_eq!(recorder.seen(), vec![Seen::Retry(1, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_in_flight_request() {
        let cfg = config(4);
        let cancel = CancellationToken::new();
        let runner = RequestRunner::new(&HangingExecutor, &cfg, cancel.clone());
        let file = PickedFile::from_bytes("a.bin", vec![0u8; 3]);

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };
        let err = upload_direct(&runner, &file, &Recorder::default())
            .await
            .unwrap_err();
        handle.await.unwrap();
        assert!(err.is_cancelled());
    }
}
