//! Upload queue: task registry, admission control and dispatch.
//!
//! All task state lives in one registry behind a mutex. Public methods and
//! worker reports are the only writers; each takes the lock, applies one
//! transition, publishes the resulting events and refills free slots before
//! releasing it. Workers run one task each and never touch the registry
//! directly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uplink_protocol::{ChunkProgress, QueueStatus, UploadConfig, UploadState};
use uplink_transfer::{
    PickedFile, SpeedCalculator, UploadError, chunk_count, confirmed_bytes,
    should_use_chunked_upload,
};

use crate::error::QueueError;
use crate::events::{Subscription, Topic};
use crate::executor::{TransferExecutor, TransferResponse};
use crate::types::{QueueOptions, TaskId, UploadResult, UploadTask};
use crate::uploader::{ChunkedUploader, RequestRunner, UploadObserver, upload_direct};

/// Transfer strategy, fixed when the task is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Direct,
    Chunked { total_chunks: usize },
}

struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
}

struct TaskEntry {
    id: TaskId,
    file: PickedFile,
    config: Arc<UploadConfig>,
    route: Route,
    state: UploadState,
    bytes_uploaded: u64,
    attempt: u32,
    retry_count: u32,
    error: Option<UploadError>,
    /// Chunks accepted by the server; survives pause and retry.
    confirmed_chunks: usize,
    file_id: Option<String>,
    speed: SpeedCalculator,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    response: Option<serde_json::Value>,
    status_code: Option<u16>,
    active: Option<ActiveRun>,
}

impl TaskEntry {
    fn new(file: PickedFile, config: Arc<UploadConfig>) -> Self {
        let route = if should_use_chunked_upload(file.size, &config) {
            Route::Chunked {
                total_chunks: chunk_count(file.size, config.effective_chunk_size()),
            }
        } else {
            Route::Direct
        };
        Self {
            id: TaskId::generate(),
            file,
            config,
            route,
            state: UploadState::Queued,
            bytes_uploaded: 0,
            attempt: 1,
            retry_count: 0,
            error: None,
            confirmed_chunks: 0,
            file_id: None,
            speed: SpeedCalculator::default(),
            started_at: None,
            completed_at: None,
            response: None,
            status_code: None,
            active: None,
        }
    }

    /// Bytes the server has acknowledged. Direct uploads have no partial
    /// acknowledgement.
    fn confirmed_bytes(&self) -> u64 {
        match self.route {
            Route::Direct => 0,
            Route::Chunked { .. } => confirmed_bytes(
                self.file.size,
                self.config.effective_chunk_size(),
                self.confirmed_chunks,
            ),
        }
    }

    /// Cancels the in-flight run, if any.
    fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn is_run(&self, run_id: u64) -> bool {
        self.active.as_ref().is_some_and(|run| run.run_id == run_id)
    }

    fn snapshot(&self) -> UploadTask {
        let speed = self.speed.bytes_per_second();
        let eta = if self.state == UploadState::Uploading {
            self.speed
                .eta(self.file.size.saturating_sub(self.bytes_uploaded))
        } else {
            None
        };
        UploadTask {
            id: self.id.clone(),
            file: self.file.clone(),
            config: Arc::clone(&self.config),
            state: self.state,
            bytes_uploaded: self.bytes_uploaded,
            bytes_total: self.file.size,
            attempt: self.attempt,
            retry_count: self.retry_count,
            error: self.error.clone(),
            chunk_progress: match self.route {
                Route::Direct => None,
                Route::Chunked { total_chunks } => Some(ChunkProgress {
                    current_chunk: self.confirmed_chunks,
                    total_chunks,
                }),
            },
            file_id: self.file_id.clone(),
            speed,
            eta,
            started_at: self.started_at,
            completed_at: self.completed_at,
            response: self.response.clone(),
        }
    }
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, TaskEntry>,
    /// Insertion order, for listings and bulk operations.
    order: Vec<TaskId>,
    /// Tasks waiting for a slot, front first.
    pending: VecDeque<TaskId>,
    is_processing: bool,
    is_paused: bool,
    disposed: bool,
    next_run: u64,
}

impl Registry {
    fn uploading(&self) -> usize {
        self.tasks.values().filter(|t| t.active.is_some()).count()
    }

    fn current_run(&mut self, id: &TaskId, run_id: u64) -> Option<&mut TaskEntry> {
        self.tasks.get_mut(id).filter(|t| t.is_run(run_id))
    }

    fn ordered(&self) -> impl Iterator<Item = &TaskEntry> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn ids_in_state(&self, state: UploadState) -> Vec<TaskId> {
        self.ordered()
            .filter(|t| t.state == state)
            .map(|t| t.id.clone())
            .collect()
    }

    fn status(&self) -> QueueStatus {
        let mut status = QueueStatus {
            total: self.tasks.len(),
            is_processing: self.is_processing,
            is_paused: self.is_paused,
            ..QueueStatus::default()
        };
        for task in self.tasks.values() {
            match task.state {
                UploadState::Queued => status.queued += 1,
                UploadState::Uploading => status.uploading += 1,
                UploadState::Completed => status.completed += 1,
                UploadState::Failed => status.failed += 1,
                UploadState::Cancelled => status.cancelled += 1,
            }
            status.total_bytes += task.file.size;
            status.total_bytes_uploaded += task.bytes_uploaded;
        }
        status
    }
}

struct Events {
    queue_change: Topic<QueueStatus>,
    progress: Topic<UploadTask>,
    complete: Topic<UploadResult>,
    error: Topic<(TaskId, UploadError)>,
}

impl Events {
    fn close(&self) {
        self.queue_change.close();
        self.progress.close();
        self.complete.close();
        self.error.close();
    }
}

struct Shared {
    executor: Arc<dyn TransferExecutor>,
    concurrency: usize,
    registry: Mutex<Registry>,
    events: Events,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_task(&self, task: &TaskEntry) {
        self.events.progress.publish(Some(&task.id), &task.snapshot());
    }

    fn publish_status(&self, registry: &Registry) {
        self.events.queue_change.publish(None, &registry.status());
    }

    fn record_progress(&self, id: &TaskId, run_id: u64, bytes: u64) {
        let mut reg = self.registry();
        let Some(task) = reg.current_run(id, run_id) else {
            return;
        };
        let bytes = bytes.min(task.file.size);
        if bytes <= task.bytes_uploaded {
            return;
        }
        task.bytes_uploaded = bytes;
        task.speed.add_sample(bytes);
        self.publish_task(task);
        self.publish_status(&reg);
    }

    fn record_retry(&self, id: &TaskId, run_id: u64, attempt: u32, err: &UploadError, confirmed: u64) {
        let mut reg = self.registry();
        let Some(task) = reg.current_run(id, run_id) else {
            return;
        };
        task.retry_count += 1;
        task.bytes_uploaded = confirmed.min(task.file.size);
        task.speed.reset();
        debug!(task = %id, attempt, error = %err, "rewound to {confirmed} bytes");
        self.publish_task(task);
        self.publish_status(&reg);
    }

    fn record_chunk(&self, id: &TaskId, run_id: u64, index: usize) {
        let mut reg = self.registry();
        let Some(task) = reg.current_run(id, run_id) else {
            return;
        };
        task.confirmed_chunks = task.confirmed_chunks.max(index + 1);
        task.bytes_uploaded = task.bytes_uploaded.max(task.confirmed_bytes());
        self.publish_task(task);
        self.publish_status(&reg);
    }
}

/// Records a finished run and refills the freed slot.
fn finish(shared: &Arc<Shared>, id: &TaskId, run_id: u64, result: Result<TransferResponse, UploadError>) {
    let mut reg = shared.registry();
    let Some(task) = reg.current_run(id, run_id) else {
        debug!(task = %id, run_id, "ignoring result of a stopped run");
        return;
    };
    task.active = None;
    task.completed_at = Some(Utc::now());

    match result {
        Ok(response) => {
            task.state = UploadState::Completed;
            task.bytes_uploaded = task.file.size;
            if let Route::Chunked { total_chunks } = task.route {
                task.confirmed_chunks = total_chunks;
            }
            task.status_code = Some(response.status);
            task.response = Some(response.json());
            task.error = None;
            info!(task = %id, file = %task.file.name, status = response.status, "upload completed");

            shared.publish_task(task);
            let snapshot = task.snapshot();
            shared.events.complete.publish(
                Some(id),
                &UploadResult {
                    id: id.clone(),
                    success: true,
                    status_code: task.status_code,
                    response: task.response.clone(),
                    error: None,
                    task: snapshot,
                },
            );
        }
        Err(err) if err.is_cancelled() => {
            task.state = UploadState::Cancelled;
            info!(task = %id, "upload aborted by executor");
            shared.publish_task(task);
        }
        Err(err) => {
            task.state = UploadState::Failed;
            task.status_code = err.status_code();
            task.bytes_uploaded = task.confirmed_bytes();
            task.error = Some(err.clone());
            error!(
                task = %id,
                file = %task.file.name,
                attempt = task.attempt,
                code = err.code(),
                error = %err,
                "upload failed"
            );

            shared.publish_task(task);
            let snapshot = task.snapshot();
            shared.events.error.publish(Some(id), &(id.clone(), err.clone()));
            shared.events.complete.publish(
                Some(id),
                &UploadResult {
                    id: id.clone(),
                    success: false,
                    status_code: task.status_code,
                    response: None,
                    error: Some(err),
                    task: snapshot,
                },
            );
        }
    }

    shared.publish_status(&reg);
    dispatch(shared, &mut reg);
}

enum Plan {
    Direct,
    Chunked { file_id: String, start_chunk: usize },
}

struct Job {
    id: TaskId,
    run_id: u64,
    file: PickedFile,
    config: Arc<UploadConfig>,
    cancel: CancellationToken,
    plan: Plan,
}

/// Starts queued tasks, oldest first, until every slot is taken.
///
/// The only place that moves a task into `uploading`.
fn dispatch(shared: &Arc<Shared>, reg: &mut Registry) {
    if !reg.is_processing || reg.is_paused || reg.disposed {
        return;
    }

    let mut started = 0;
    while reg.uploading() < shared.concurrency {
        let Some(id) = reg.pending.pop_front() else {
            break;
        };
        let run_id = reg.next_run;
        let Some(task) = reg.tasks.get_mut(&id) else {
            continue;
        };
        if task.state != UploadState::Queued {
            continue;
        }
        reg.next_run += 1;

        let cancel = CancellationToken::new();
        task.state = UploadState::Uploading;
        task.active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
        });
        task.started_at.get_or_insert_with(Utc::now);
        task.speed.reset();

        let plan = match task.route {
            Route::Direct => Plan::Direct,
            Route::Chunked { .. } => Plan::Chunked {
                file_id: task
                    .file_id
                    .get_or_insert_with(|| format!("file_{}", uuid::Uuid::new_v4().simple()))
                    .clone(),
                start_chunk: task.confirmed_chunks,
            },
        };

        info!(
            task = %id,
            file = %task.file.name,
            size = task.file.size,
            attempt = task.attempt,
            chunked = matches!(task.route, Route::Chunked { .. }),
            "upload started"
        );
        shared.publish_task(task);

        let job = Job {
            id: id.clone(),
            run_id,
            file: task.file.clone(),
            config: Arc::clone(&task.config),
            cancel,
            plan,
        };
        tokio::spawn(run_job(Arc::clone(shared), job));
        started += 1;
    }

    if started > 0 {
        shared.publish_status(reg);
    }
}

/// Bridges uploader callbacks to the registry for one run.
struct RunReporter<'a> {
    shared: &'a Shared,
    id: &'a TaskId,
    run_id: u64,
}

impl UploadObserver for RunReporter<'_> {
    fn bytes_sent(&self, bytes: u64) {
        self.shared.record_progress(self.id, self.run_id, bytes);
    }

    fn retrying(&self, attempt: u32, error: &UploadError, _delay: Duration, confirmed: u64) {
        self.shared
            .record_retry(self.id, self.run_id, attempt, error, confirmed);
    }

    fn chunk_confirmed(&self, index: usize, total: usize) {
        debug!(task = %self.id, chunk = index, total, "chunk confirmed");
        self.shared.record_chunk(self.id, self.run_id, index);
    }
}

async fn run_job(shared: Arc<Shared>, job: Job) {
    let result = {
        let reporter = RunReporter {
            shared: &shared,
            id: &job.id,
            run_id: job.run_id,
        };
        let executor = Arc::clone(&shared.executor);
        let runner = RequestRunner::new(executor.as_ref(), &job.config, job.cancel.clone());
        match &job.plan {
            Plan::Direct => upload_direct(&runner, &job.file, &reporter).await,
            Plan::Chunked {
                file_id,
                start_chunk,
            } => {
                ChunkedUploader::new(&runner, &job.file, file_id)
                    .upload(*start_chunk, &reporter)
                    .await
            }
        }
    };
    finish(&shared, &job.id, job.run_id, result);
}

/// Concurrency-bounded upload queue.
///
/// Dropping the queue disposes it. Dispatch spawns onto the current Tokio
/// runtime, so `add`, `start`, `resume` and `retry` must be called from
/// within one.
pub struct UploadQueue {
    shared: Arc<Shared>,
}

impl UploadQueue {
    pub fn new(executor: Arc<dyn TransferExecutor>, options: QueueOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                concurrency: options.concurrency.max(1),
                registry: Mutex::new(Registry::default()),
                events: Events {
                    queue_change: Topic::new(),
                    progress: Topic::new(),
                    complete: Topic::new(),
                    error: Topic::new(),
                },
            }),
        }
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, Registry>, QueueError> {
        let reg = self.shared.registry();
        if reg.disposed {
            return Err(QueueError::Disposed);
        }
        Ok(reg)
    }

    /// Registers one `queued` task per file. Starts them right away only
    /// when the queue is already processing.
    pub fn add(
        &self,
        files: impl IntoIterator<Item = PickedFile>,
        config: UploadConfig,
    ) -> Result<Vec<TaskId>, QueueError> {
        let mut reg = self.lock_live()?;
        let config = Arc::new(config);

        let mut ids = Vec::new();
        for file in files {
            let task = TaskEntry::new(file, Arc::clone(&config));
            debug!(
                task = %task.id,
                file = %task.file.name,
                size = task.file.size,
                route = ?task.route,
                "upload queued"
            );
            reg.order.push(task.id.clone());
            reg.pending.push_back(task.id.clone());
            ids.push(task.id.clone());
            reg.tasks.insert(task.id.clone(), task);
        }

        if !ids.is_empty() {
            self.shared.publish_status(&reg);
            dispatch(&self.shared, &mut reg);
        }
        Ok(ids)
    }

    /// Turns dispatch on and fills the free slots.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut reg = self.lock_live()?;
        reg.is_processing = true;
        reg.is_paused = false;
        info!(queued = reg.pending.len(), concurrency = self.shared.concurrency, "queue started");
        self.shared.publish_status(&reg);
        dispatch(&self.shared, &mut reg);
        Ok(())
    }

    /// Stops every in-flight transfer and puts those tasks back in front of
    /// the pending queue. Chunked tasks keep their confirmed chunks.
    pub fn pause(&self) -> Result<(), QueueError> {
        let mut reg = self.lock_live()?;
        reg.is_paused = true;

        let interrupted = reg.ids_in_state(UploadState::Uploading);
        for id in interrupted.iter().rev() {
            reg.pending.push_front(id.clone());
        }
        for id in &interrupted {
            let Some(task) = reg.tasks.get_mut(id) else {
                continue;
            };
            task.stop();
            task.state = UploadState::Queued;
            task.bytes_uploaded = task.confirmed_bytes();
            task.speed.reset();
            self.shared.publish_task(task);
        }

        info!(interrupted = interrupted.len(), "queue paused");
        self.shared.publish_status(&reg);
        Ok(())
    }

    /// Clears the pause flag and dispatches if the queue was started.
    pub fn resume(&self) -> Result<(), QueueError> {
        let mut reg = self.lock_live()?;
        reg.is_paused = false;
        info!(queued = reg.pending.len(), "queue resumed");
        self.shared.publish_status(&reg);
        dispatch(&self.shared, &mut reg);
        Ok(())
    }

    /// Cancels one task. Cancelling a finished task is a no-op.
    pub fn cancel(&self, id: &TaskId) -> Result<(), QueueError> {
        let mut reg = self.lock_live()?;
        let task = reg
            .tasks
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if task.state.is_terminal() {
            return Ok(());
        }

        let was_running = task.stop();
        task.state = UploadState::Cancelled;
        task.completed_at = Some(Utc::now());
        info!(task = %id, was_running, "upload cancelled");
        self.shared.publish_task(task);

        reg.pending.retain(|pending| pending != id);
        self.shared.publish_status(&reg);
        dispatch(&self.shared, &mut reg);
        Ok(())
    }

    /// Cancels every queued or uploading task. Returns how many changed.
    pub fn cancel_all(&self) -> Result<usize, QueueError> {
        let mut reg = self.lock_live()?;
        let ids: Vec<TaskId> = reg
            .ordered()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        let now = Utc::now();
        for id in &ids {
            let Some(task) = reg.tasks.get_mut(id) else {
                continue;
            };
            task.stop();
            task.state = UploadState::Cancelled;
            task.completed_at = Some(now);
            self.shared.publish_task(task);
        }
        reg.pending.clear();

        info!(cancelled = ids.len(), "all uploads cancelled");
        if !ids.is_empty() {
            self.shared.publish_status(&reg);
        }
        Ok(ids.len())
    }

    /// Re-queues a failed task at the back of the queue.
    ///
    /// The attempt counter goes up by one and the last error is cleared.
    /// Chunked tasks continue after their last confirmed chunk.
    pub fn retry(&self, id: &TaskId) -> Result<(), QueueError> {
        let mut reg = self.lock_live()?;
        let task = reg
            .tasks
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if task.state != UploadState::Failed {
            return Err(QueueError::InvalidState {
                id: id.clone(),
                state: task.state,
                expected: UploadState::Failed,
            });
        }

        requeue(task);
        info!(task = %id, attempt = task.attempt, "upload retried");
        self.shared.publish_task(task);

        reg.pending.push_back(id.clone());
        self.shared.publish_status(&reg);
        dispatch(&self.shared, &mut reg);
        Ok(())
    }

    /// Retries every failed task, in insertion order. Returns the count.
    pub fn retry_all(&self) -> Result<usize, QueueError> {
        let mut reg = self.lock_live()?;
        let ids = reg.ids_in_state(UploadState::Failed);
        for id in &ids {
            let Some(task) = reg.tasks.get_mut(id) else {
                continue;
            };
            requeue(task);
            self.shared.publish_task(task);
            reg.pending.push_back(id.clone());
        }

        if !ids.is_empty() {
            info!(retried = ids.len(), "failed uploads retried");
            self.shared.publish_status(&reg);
            dispatch(&self.shared, &mut reg);
        }
        Ok(ids.len())
    }

    /// Deletes a task in any state, stopping it first if it is running.
    pub fn remove(&self, id: &TaskId) -> Result<UploadTask, QueueError> {
        let mut reg = self.lock_live()?;
        let mut task = reg
            .tasks
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let was_running = task.stop();
        reg.order.retain(|other| other != id);
        reg.pending.retain(|other| other != id);
        debug!(task = %id, was_running, "upload removed");

        self.shared.publish_status(&reg);
        dispatch(&self.shared, &mut reg);
        Ok(task.snapshot())
    }

    /// Deletes completed and cancelled tasks. Returns how many were removed.
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        let mut reg = self.lock_live()?;
        let finished: Vec<TaskId> = reg
            .ordered()
            .filter(|t| matches!(t.state, UploadState::Completed | UploadState::Cancelled))
            .map(|t| t.id.clone())
            .collect();
        if finished.is_empty() {
            return Ok(0);
        }

        for id in &finished {
            reg.tasks.remove(id);
        }
        let Registry { tasks, order, .. } = &mut *reg;
        order.retain(|id| tasks.contains_key(id));

        debug!(removed = finished.len(), "cleared finished uploads");
        self.shared.publish_status(&reg);
        Ok(finished.len())
    }

    pub fn get_upload(&self, id: &TaskId) -> Option<UploadTask> {
        self.shared.registry().tasks.get(id).map(TaskEntry::snapshot)
    }

    /// Snapshots of every task, in insertion order.
    pub fn uploads(&self) -> Vec<UploadTask> {
        self.shared
            .registry()
            .ordered()
            .map(TaskEntry::snapshot)
            .collect()
    }

    pub fn status(&self) -> QueueStatus {
        self.shared.registry().status()
    }

    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Full status after every queue mutation.
    pub fn on_queue_change(&self) -> Subscription<QueueStatus> {
        self.shared.events.queue_change.subscribe(None)
    }

    /// Snapshots of one task whenever its progress or state changes.
    pub fn on_progress(&self, id: &TaskId) -> Subscription<UploadTask> {
        self.shared.events.progress.subscribe(Some(id.clone()))
    }

    /// Snapshots of every task whenever its progress or state changes.
    pub fn on_any_progress(&self) -> Subscription<UploadTask> {
        self.shared.events.progress.subscribe(None)
    }

    /// Results of tasks reaching `completed` or `failed`.
    pub fn on_complete(&self) -> Subscription<UploadResult> {
        self.shared.events.complete.subscribe(None)
    }

    /// Terminal failures.
    pub fn on_error(&self) -> Subscription<(TaskId, UploadError)> {
        self.shared.events.error.subscribe(None)
    }

    /// Waits until no task is queued or uploading, or the queue is disposed.
    ///
    /// Tasks left `queued` by a pause or by a queue that was never started
    /// keep this waiting.
    pub async fn wait_idle(&self) -> QueueStatus {
        let mut changes = self.on_queue_change();
        loop {
            let status = self.status();
            if status.is_idle() {
                return status;
            }
            if changes.recv().await.is_none() {
                return self.status();
            }
        }
    }

    /// Stops every transfer, drops all tasks and ends every subscription.
    /// Idempotent.
    pub fn dispose(&self) {
        let mut reg = self.shared.registry();
        if reg.disposed {
            return;
        }
        reg.disposed = true;
        reg.is_processing = false;

        let mut stopped = 0;
        for task in reg.tasks.values_mut() {
            if task.stop() {
                stopped += 1;
            }
        }
        let total = reg.tasks.len();
        reg.tasks.clear();
        reg.order.clear();
        reg.pending.clear();
        self.shared.events.close();
        info!(tasks = total, stopped, "queue disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.registry().disposed
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Moves a failed task back to `queued` for another attempt.
fn requeue(task: &mut TaskEntry) {
    task.attempt += 1;
    task.state = UploadState::Queued;
    task.error = None;
    task.status_code = None;
    task.response = None;
    task.completed_at = None;
    task.bytes_uploaded = task.confirmed_bytes();
    task.speed.reset();
}
