#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uplink_protocol::{RetryStrategy, UploadConfig};
use uplink_queue::{
    ProgressSender, QueueOptions, RequestKind, SendFuture, TransferExecutor, TransferRequest,
    TransferResponse, UploadQueue,
};
use uplink_transfer::{PickedFile, UploadError};

/// A request held by [`ControlledExecutor`] until the test answers it.
pub struct Pending {
    pub request: TransferRequest,
    pub progress: ProgressSender,
    pub cancel: CancellationToken,
    respond: oneshot::Sender<Result<TransferResponse, UploadError>>,
}

impl Pending {
    pub fn file_name(&self) -> &str {
        match &self.request.body {
            uplink_queue::RequestBody::Multipart { file_name, .. } => file_name,
            uplink_queue::RequestBody::Json(v) => v["fileName"].as_str().unwrap_or_default(),
            uplink_queue::RequestBody::Raw { .. } => "",
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.request.kind
    }

    /// Reports `written` bytes of this request's body.
    pub async fn report(&self, written: u64) {
        self.progress.send(written).await.unwrap();
    }

    pub fn ok(self) {
        let _ = self.respond.send(Ok(TransferResponse::new(200, r#"{"stored":true}"#)));
    }

    pub fn status(self, status: u16) {
        let _ = self.respond.send(Ok(TransferResponse::new(status, "")));
    }

    pub fn fail(self, err: UploadError) {
        let _ = self.respond.send(Err(err));
    }
}

/// Executor whose every request waits for an explicit answer.
pub struct ControlledExecutor {
    started: mpsc::UnboundedSender<Pending>,
}

impl ControlledExecutor {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Pending>) {
        let (started, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { started }), rx)
    }
}

impl TransferExecutor for ControlledExecutor {
    fn send(
        &self,
        request: TransferRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> SendFuture<'_> {
        Box::pin(async move {
            let (respond, answer) = oneshot::channel();
            let _ = self.started.send(Pending {
                request,
                progress,
                cancel: cancel.clone(),
                respond,
            });
            tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                answer = answer => answer.unwrap_or(Err(UploadError::Network("dropped".into()))),
            }
        })
    }
}

/// Queue over a [`ControlledExecutor`].
pub fn controlled_queue(concurrency: usize) -> (UploadQueue, mpsc::UnboundedReceiver<Pending>) {
    let (executor, started) = ControlledExecutor::new();
    let queue = UploadQueue::new(executor, QueueOptions::with_concurrency(concurrency));
    (queue, started)
}

/// Config without timeouts or jitter, with 1 ms fixed backoff.
pub fn test_config() -> UploadConfig {
    UploadConfig {
        timeout_ms: 0,
        retry_delay_strategy: RetryStrategy::Fixed,
        retry_delay_ms: 1,
        retry_jitter: 0.0,
        ..UploadConfig::new("https://upload.test/files")
    }
}

/// Config that always takes the chunked route with `chunk_size` chunks.
pub fn chunked_config(chunk_size: u64) -> UploadConfig {
    UploadConfig {
        chunked: Some(true),
        chunk_size,
        ..test_config()
    }
}

pub fn file(name: &str, size: usize) -> PickedFile {
    PickedFile::from_bytes(name, vec![7u8; size])
}

/// Next started request, failing the test if none arrives in time.
pub async fn next(started: &mut mpsc::UnboundedReceiver<Pending>) -> Pending {
    tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .expect("no request started")
        .expect("executor dropped")
}

/// Asserts that no further request starts within a short grace period.
pub async fn assert_quiet(started: &mut mpsc::UnboundedReceiver<Pending>) {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(started.try_recv().is_err(), "unexpected request started");
}

/// Receives events until one satisfies `pred`.
pub async fn until<T>(sub: &mut uplink_queue::Subscription<T>, mut pred: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = sub.recv().await.expect("subscription closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received")
}
