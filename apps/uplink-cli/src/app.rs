//! Run orchestrator: builds the queue, enqueues files and reports progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use uplink_http::HttpExecutor;
use uplink_protocol::QueueStatus;
use uplink_queue::{QueueOptions, Subscription, TaskId, UploadQueue, UploadResult, UploadTask};
use uplink_transfer::{PickedFile, format_bytes, format_duration};

use crate::config::Profile;

/// Progress is logged each time a task crosses another step of this size.
const PROGRESS_STEP: f64 = 10.0;

/// Final tally of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Summary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

impl From<&QueueStatus> for Summary {
    fn from(status: &QueueStatus) -> Self {
        Self {
            completed: status.completed,
            failed: status.failed,
            cancelled: status.cancelled,
        }
    }
}

/// Uploads `files` and returns once every task settled or Ctrl-C was hit.
pub async fn run(profile: Profile, files: Vec<PathBuf>) -> anyhow::Result<Summary> {
    if profile.upload.url.is_empty() {
        anyhow::bail!("no upload URL: pass --url or set upload.url in the profile");
    }

    let mut picked = Vec::with_capacity(files.len());
    for path in &files {
        let file = PickedFile::from_path(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        picked.push(file);
    }

    let executor = HttpExecutor::new().context("building HTTP client")?;
    let queue = UploadQueue::new(
        Arc::new(executor),
        QueueOptions::with_concurrency(profile.concurrency),
    );

    let progress = tokio::spawn(log_progress(queue.on_any_progress()));
    let results = tokio::spawn(log_results(queue.on_complete()));

    let ids = queue.add(picked, profile.upload)?;
    info!(files = ids.len(), concurrency = queue.concurrency(), "uploads queued");
    queue.start()?;

    let status = tokio::select! {
        status = queue.wait_idle() => status,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling uploads");
            let status = queue.status();
            let interrupted = status.queued + status.uploading;
            queue.dispose();
            QueueStatus {
                cancelled: status.cancelled + interrupted,
                ..status
            }
        }
    };

    // Ends both subscriptions once their buffered events are consumed.
    queue.dispose();
    let _ = progress.await;
    let _ = results.await;

    let summary = Summary::from(&status);
    info!(
        completed = summary.completed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        uploaded = %format_bytes(status.total_bytes_uploaded),
        "run finished"
    );
    Ok(summary)
}

async fn log_progress(mut updates: Subscription<UploadTask>) {
    let mut last_step: HashMap<TaskId, u32> = HashMap::new();
    while let Some(task) = updates.recv().await {
        let step = (task.percentage() / PROGRESS_STEP) as u32;
        let seen = last_step.entry(task.id.clone()).or_insert(0);
        if step <= *seen {
            continue;
        }
        *seen = step;

        let eta = task
            .eta
            .map(format_duration)
            .unwrap_or_else(|| "unknown".into());
        info!(
            file = %task.file.name,
            percent = task.percentage().round() as u32,
            sent = %format_bytes(task.bytes_uploaded),
            total = %format_bytes(task.bytes_total),
            speed = %format!("{}/s", format_bytes(task.speed as u64)),
            eta = %eta,
            "uploading"
        );
    }
}

async fn log_results(mut results: Subscription<UploadResult>) {
    while let Some(result) = results.recv().await {
        let name = &result.task.file.name;
        match (&result.error, result.success) {
            (None, true) => info!(
                file = %name,
                status = ?result.status_code,
                size = %format_bytes(result.task.bytes_total),
                "upload completed"
            ),
            (Some(e), _) => error!(file = %name, error = %e, "upload failed"),
            (None, false) => error!(file = %name, "upload failed"),
        }
    }
}
