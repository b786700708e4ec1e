//! Sync engine
//!
//! The [`SyncEngine`] owns the worker pools, the retry policy, the
//! reconciliation algorithm and the scheduled pass. It consumes batched
//! filesystem events and produces upload tasks against the
//! [`ObjectStore`] port.
//!
//! ## Task flow
//!
//! ```text
//! batched events ──► dispatcher ──► upload queue ──► upload workers ──► store
//! scheduler tick ──► reconciliation ─────┘
//! ```
//!
//! ## Lifecycle
//!
//! `Created → Running → Stopping → Stopped`. A single cancellation token
//! is observed at every suspension point; `stop()` cancels it, joins all
//! worker handles and is idempotent. Workers never hold locks across
//! adapter calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cumulus_core::domain::{FileEvent, FileInfo, FileMetadata, FileOp, SyncDirectory, SyncError, SyncStats};
use cumulus_core::ports::{Direction, DropStage, MetricsSink, ObjectStore, SyncOperation};

use crate::filter::PathFilter;
use crate::fsutil;

/// Capacity of the upload and download task channels.
const TASK_QUEUE_CAPACITY: usize = 100;

/// Copy buffer for download streaming.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Tasks
// ============================================================================

/// What a worker should do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Upload,
    Download,
    Delete,
}

/// A unit of work owned by exactly one worker from dispatch to completion.
#[derive(Debug, Clone)]
pub struct SyncTask {
    /// Absolute local path the task reads from or writes to
    pub local_path: PathBuf,
    /// Fully joined remote key
    pub remote_key: String,
    /// Operation to perform
    pub kind: TaskKind,
    /// Local metadata captured at enqueue time, when available
    pub metadata: Option<FileMetadata>,
    /// Retry attempts consumed so far
    pub attempt: u32,
}

impl SyncTask {
    /// Creates an upload task for a local file.
    pub fn upload(local_path: impl Into<PathBuf>, remote_key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            kind: TaskKind::Upload,
            metadata: None,
            attempt: 0,
        }
    }

    /// Creates a download task for a remote object.
    pub fn download(local_path: impl Into<PathBuf>, remote_key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            kind: TaskKind::Download,
            metadata: None,
            attempt: 0,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Tuning knobs for the engine, taken from the performance and security
/// configuration sections.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upload worker count
    pub max_concurrent_uploads: usize,
    /// Download worker count
    pub max_concurrent_downloads: usize,
    /// Additional attempts after the first failure of a task
    pub retry_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: std::time::Duration,
    /// Period of the scheduled reconciliation pass
    pub scheduled_interval: std::time::Duration,
    /// Files larger than this (bytes) are skipped; 0 disables the check
    pub max_file_size: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 5,
            max_concurrent_downloads: 5,
            retry_attempts: 3,
            retry_delay: std::time::Duration::from_secs(5),
            scheduled_interval: std::time::Duration::from_secs(300),
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

// ============================================================================
// Engine state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Created,
    Running,
    Stopping,
    Stopped,
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Orchestrates reconciliation, event-driven updates and scheduled passes.
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSink>,
    options: EngineOptions,
    /// Static exclusions (built-ins + security extension gates); directory
    /// filters are layered on top per operation.
    base_filter: PathFilter,
    directories: RwLock<Vec<SyncDirectory>>,
    upload_tx: mpsc::Sender<SyncTask>,
    upload_rx: std::sync::Mutex<Option<mpsc::Receiver<SyncTask>>>,
    download_tx: mpsc::Sender<SyncTask>,
    download_rx: std::sync::Mutex<Option<mpsc::Receiver<SyncTask>>>,
    stats: RwLock<SyncStats>,
    cancel: CancellationToken,
    state: std::sync::Mutex<EngineState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Creates an engine over the given store and metrics sink.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSink>,
        base_filter: PathFilter,
        options: EngineOptions,
    ) -> Self {
        let (upload_tx, upload_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let (download_tx, download_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);

        Self {
            store,
            metrics,
            options,
            base_filter,
            directories: RwLock::new(Vec::new()),
            upload_tx,
            upload_rx: std::sync::Mutex::new(Some(upload_rx)),
            download_tx,
            download_rx: std::sync::Mutex::new(Some(download_rx)),
            stats: RwLock::new(SyncStats::default()),
            cancel: CancellationToken::new(),
            state: std::sync::Mutex::new(EngineState::Created),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a directory for synchronization.
    ///
    /// Directories are immutable once registered; reconfiguration restarts
    /// the affected pipeline.
    pub fn add_directory(&self, dir: SyncDirectory) {
        info!(
            local_path = %dir.local_path.display(),
            remote_path = %dir.remote_path,
            sync_mode = %dir.sync_mode,
            "Registered directory for sync"
        );

        let mut dirs = self.directories.write().unwrap();
        dirs.push(dir);
        self.stats.write().unwrap().active_directories = dirs.len();
    }

    /// Snapshot of the registered directories.
    pub fn directories(&self) -> Vec<SyncDirectory> {
        self.directories.read().unwrap().clone()
    }

    /// Returns true if any enabled directory participates in the realtime
    /// pipeline.
    pub fn has_realtime_directories(&self) -> bool {
        self.directories
            .read()
            .unwrap()
            .iter()
            .any(|d| d.enabled && d.sync_mode.is_realtime())
    }

    /// Returns true if any enabled directory is visited by the scheduler.
    pub fn has_scheduled_directories(&self) -> bool {
        self.directories
            .read()
            .unwrap()
            .iter()
            .any(|d| d.enabled && d.sync_mode.is_scheduled())
    }

    /// Snapshot of the engine's statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().unwrap().clone()
    }

    /// Enqueues a task on the owning pool's queue, applying backpressure.
    ///
    /// Uploads go to the upload pool; downloads and deletes to the remote
    /// operations pool. The send respects the cancellation token so
    /// shutdown stays prompt.
    pub async fn enqueue_task(&self, task: SyncTask) -> Result<(), SyncError> {
        let tx = match task.kind {
            TaskKind::Upload => &self.upload_tx,
            TaskKind::Download | TaskKind::Delete => &self.download_tx,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            sent = tx.send(task) => {
                sent.map_err(|_| SyncError::InvalidState("task queue closed".into()))
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts worker pools, the event dispatcher and the scheduler.
    ///
    /// `events` is the batched event stream. Rejected when the engine is
    /// not freshly created.
    pub fn start(
        self: &Arc<Self>,
        events: mpsc::Receiver<FileEvent>,
    ) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EngineState::Created {
                return Err(SyncError::InvalidState(
                    "sync engine is already running".into(),
                ));
            }
            *state = EngineState::Running;
        }

        info!(
            upload_workers = self.options.max_concurrent_uploads,
            download_workers = self.options.max_concurrent_downloads,
            "Starting sync engine"
        );

        let upload_queue = Arc::new(Mutex::new(
            self.upload_rx
                .lock()
                .unwrap()
                .take()
                .expect("upload queue consumed"),
        ));
        let download_queue = Arc::new(Mutex::new(
            self.download_rx
                .lock()
                .unwrap()
                .take()
                .expect("download queue consumed"),
        ));

        let mut handles = Vec::new();

        for worker_id in 0..self.options.max_concurrent_uploads {
            let engine = Arc::clone(self);
            let queue = Arc::clone(&upload_queue);
            handles.push(tokio::spawn(async move {
                engine.run_worker(queue, "upload", worker_id).await;
            }));
        }

        for worker_id in 0..self.options.max_concurrent_downloads {
            let engine = Arc::clone(self);
            let queue = Arc::clone(&download_queue);
            handles.push(tokio::spawn(async move {
                engine.run_worker(queue, "download", worker_id).await;
            }));
        }

        {
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                engine.run_event_loop(events).await;
            }));
        }

        if self.has_scheduled_directories() {
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                engine.run_scheduler().await;
            }));
        }

        self.metrics.record_active_tasks(handles.len() as i64);

        // start() is not async, so the handle vec cannot be contended yet.
        *self.workers.try_lock().expect("workers lock") = handles;

        info!("Sync engine started");
        Ok(())
    }

    /// Stops the engine: cancels all workers, drains in-flight tasks and
    /// joins the handles. Idempotent; repeated calls return immediately.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                EngineState::Running => *state = EngineState::Stopping,
                EngineState::Created => {
                    *state = EngineState::Stopped;
                    return;
                }
                EngineState::Stopping | EngineState::Stopped => return,
            }
        }

        info!("Stopping sync engine");
        self.cancel.cancel();

        let handles = {
            let mut workers = self.workers.lock().await;
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked during shutdown");
            }
        }

        *self.state.lock().unwrap() = EngineState::Stopped;
        self.metrics.record_active_tasks(0);
        info!("Sync engine stopped");
    }

    // ========================================================================
    // Worker loop and retry policy
    // ========================================================================

    /// Drains a task queue until cancellation or queue closure.
    ///
    /// The queue receiver is shared across the pool; the mutex is held
    /// only while waiting for the next task, never during execution.
    async fn run_worker(
        self: Arc<Self>,
        queue: Arc<Mutex<mpsc::Receiver<SyncTask>>>,
        pool: &'static str,
        worker_id: usize,
    ) {
        debug!(pool, worker_id, "Worker started");

        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => break,
                task = async { queue.lock().await.recv().await } => {
                    match task {
                        Some(t) => t,
                        None => break,
                    }
                }
            };

            self.process_task(task, pool, worker_id).await;
        }

        debug!(pool, worker_id, "Worker stopped");
    }

    /// Executes one task under the retry policy.
    ///
    /// Transient errors are retried up to `retry_attempts` times with a
    /// fixed delay; permanent errors short-circuit. Retry-only failures
    /// are not counted as task errors. Cancellation abandons the task
    /// without an error record.
    async fn process_task(&self, mut task: SyncTask, pool: &'static str, worker_id: usize) {
        let start = Instant::now();
        let op = match task.kind {
            TaskKind::Upload => SyncOperation::Upload,
            TaskKind::Download => SyncOperation::Download,
            TaskKind::Delete => SyncOperation::Delete,
        };

        debug!(
            pool,
            worker_id,
            local_path = %task.local_path.display(),
            remote_key = %task.remote_key,
            "Processing task"
        );

        loop {
            let result = match task.kind {
                TaskKind::Upload => self.upload_file(&task).await,
                TaskKind::Download => self.download_file(&task).await,
                TaskKind::Delete => self.with_cancel(self.store.delete(&task.remote_key)).await,
            };

            match result {
                Ok(()) => {
                    self.metrics.record_operation(op, start.elapsed(), true);
                    self.record_success(task.kind);
                    info!(
                        local_path = %task.local_path.display(),
                        remote_key = %task.remote_key,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "{} completed", op.as_str()
                    );
                    return;
                }
                Err(SyncError::Cancelled) => {
                    debug!(
                        remote_key = %task.remote_key,
                        "Task abandoned during shutdown"
                    );
                    return;
                }
                Err(e) if e.is_transient() && task.attempt < self.options.retry_attempts => {
                    task.attempt += 1;
                    warn!(
                        remote_key = %task.remote_key,
                        attempt = task.attempt,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    if !self.sleep_cancellable(self.options.retry_delay).await {
                        return;
                    }
                }
                Err(e) => {
                    self.metrics.record_operation(op, start.elapsed(), false);
                    self.record_error();
                    error!(
                        local_path = %task.local_path.display(),
                        remote_key = %task.remote_key,
                        attempts = task.attempt + 1,
                        error = %e,
                        "Task failed"
                    );
                    return;
                }
            }
        }
    }

    fn record_success(&self, kind: TaskKind) {
        let mut stats = self.stats.write().unwrap();
        match kind {
            TaskKind::Upload => stats.files_uploaded += 1,
            TaskKind::Download => stats.files_downloaded += 1,
            TaskKind::Delete => stats.files_deleted += 1,
        }
        stats.last_sync = Some(Utc::now());
    }

    fn record_error(&self) {
        self.stats.write().unwrap().sync_errors += 1;
    }

    /// Races a fallible future against the cancellation token.
    ///
    /// Dropping the future aborts the underlying operation promptly;
    /// cancellation is reported distinctly from transport failure.
    async fn with_cancel<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = fut => result,
        }
    }

    /// Sleeps unless cancelled first; returns false on cancellation.
    async fn sleep_cancellable(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    // ========================================================================
    // Upload execution
    // ========================================================================

    /// Uploads one file: streams the content digest, captures metadata and
    /// hands the source to the adapter.
    async fn upload_file(&self, task: &SyncTask) -> Result<(), SyncError> {
        let path = &task.local_path;

        let (digest_hex, size) = fsutil::stream_md5(path).await?;
        let std_meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::local_io(path, e))?;
        let mtime = std_meta.modified().ok().map(DateTime::<Utc>::from);

        let metadata = FileMetadata {
            size,
            mtime,
            digest_hex,
            content_type: fsutil::content_type_for(path).to_string(),
            permissions: fsutil::permissions_string(&std_meta),
            encrypted: false,
        };

        self.with_cancel(self.store.upload(&task.remote_key, path, &metadata))
            .await?;

        self.metrics.record_bandwidth(size, Direction::Upload);
        self.stats.write().unwrap().bytes_uploaded += size;
        Ok(())
    }

    // ========================================================================
    // Download execution
    // ========================================================================

    /// Downloads one object to its local path via a temp file.
    ///
    /// The body is streamed to `<name>.partial` while a running digest is
    /// computed; on digest mismatch the partial file is discarded and the
    /// task fails permanently. The final rename is atomic.
    async fn download_file(&self, task: &SyncTask) -> Result<(), SyncError> {
        let path = &task.local_path;

        let (body, metadata) = self
            .with_cancel(self.store.download(&task.remote_key))
            .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e))?;
        }

        let tmp_path = partial_path(path);
        let result = self.copy_and_verify(body, &tmp_path, &metadata).await;

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                // Never retain a partial file
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| SyncError::local_io(path, e))?;

        if let Some(mtime) = metadata.mtime {
            let ft = filetime::FileTime::from_unix_time(
                mtime.timestamp(),
                mtime.timestamp_subsec_nanos(),
            );
            if let Err(e) = filetime::set_file_mtime(path, ft) {
                warn!(path = %path.display(), error = %e, "Failed to set file modification time");
            }
        }

        self.metrics.record_bandwidth(size, Direction::Download);
        self.stats.write().unwrap().bytes_downloaded += size;
        Ok(())
    }

    /// Streams `body` into `tmp_path`, verifying the advertised digest.
    async fn copy_and_verify(
        &self,
        mut body: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        tmp_path: &Path,
        metadata: &FileMetadata,
    ) -> Result<u64, SyncError> {
        let mut file = tokio::fs::File::create(tmp_path)
            .await
            .map_err(|e| SyncError::local_io(tmp_path, e))?;

        let mut context = md5::Context::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                n = body.read(&mut buf) => {
                    n.map_err(|e| SyncError::Transport(format!("read body: {e}")))?
                }
            };
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| SyncError::local_io(tmp_path, e))?;
            context.consume(&buf[..n]);
            size += n as u64;
        }

        file.flush()
            .await
            .map_err(|e| SyncError::local_io(tmp_path, e))?;
        drop(file);

        let actual = format!("{:x}", context.compute());
        if !metadata.digest_hex.is_empty() && metadata.digest_hex != actual {
            return Err(SyncError::Integrity {
                expected: metadata.digest_hex.clone(),
                actual,
            });
        }

        Ok(size)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Runs one reconciliation pass for a directory, recording the outcome.
    pub async fn sync_directory(&self, dir: &SyncDirectory) -> Result<(), SyncError> {
        if !dir.enabled {
            return Ok(());
        }

        info!(
            local_path = %dir.local_path.display(),
            remote_path = %dir.remote_path,
            "Starting reconciliation pass"
        );

        let start = Instant::now();
        let result = self.reconcile(dir).await;
        self.metrics
            .record_operation(SyncOperation::Sync, start.elapsed(), result.is_ok());

        match &result {
            Ok(()) => info!(
                local_path = %dir.local_path.display(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Reconciliation pass completed"
            ),
            Err(SyncError::Cancelled) => {}
            Err(e) => error!(
                local_path = %dir.local_path.display(),
                error = %e,
                "Reconciliation pass failed"
            ),
        }

        result
    }

    /// Compares local and remote listings and enqueues uploads for any
    /// divergence. Upload-only: downloads and deletions are not produced
    /// by reconciliation.
    async fn reconcile(&self, dir: &SyncDirectory) -> Result<(), SyncError> {
        let filter = self.base_filter.with_patterns(&dir.filters);

        let local = collect_local_files(&dir.local_path, dir.recursive).await?;
        let remote = self.with_cancel(self.store.list(&dir.remote_path)).await?;

        let remote_map: HashMap<&str, &FileInfo> =
            remote.iter().map(|info| (info.key.as_str(), info)).collect();

        let mut enqueued = 0usize;
        for (path, meta) in &local {
            if filter.excludes(path) {
                continue;
            }
            if self.exceeds_size_limit(path, meta.len()) {
                continue;
            }
            let Some(remote_key) = dir.remote_key_for(path) else {
                continue;
            };

            let mtime = meta.modified().ok().map(DateTime::<Utc>::from);
            let upload = match remote_map.get(remote_key.as_str()) {
                None => true,
                Some(info) => needs_upload(mtime, meta.len(), info),
            };
            if !upload {
                continue;
            }

            // Blocking send: reconciliation applies backpressure rather
            // than dropping, but shutdown stays prompt.
            self.enqueue_task(SyncTask::upload(path.clone(), remote_key))
                .await?;
            enqueued += 1;
        }

        debug!(
            local = local.len(),
            remote = remote.len(),
            enqueued,
            "Reconciliation enumerated"
        );
        Ok(())
    }

    fn exceeds_size_limit(&self, path: &Path, size: u64) -> bool {
        if self.options.max_file_size > 0 && size > self.options.max_file_size {
            warn!(
                path = %path.display(),
                size = %fsutil::format_bytes(size),
                limit = %fsutil::format_bytes(self.options.max_file_size),
                "File exceeds size limit, skipping"
            );
            return true;
        }
        false
    }

    // ========================================================================
    // Event-driven dispatch
    // ========================================================================

    /// Consumes batched events until cancellation or stream end.
    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<FileEvent>) {
        info!("Event dispatcher started");

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                ev = events.recv() => {
                    match ev {
                        Some(e) => e,
                        None => break,
                    }
                }
            };
            self.handle_event(event).await;
        }

        info!("Event dispatcher stopped");
    }

    /// Turns one batched event into an upload task, or drops it.
    async fn handle_event(&self, event: FileEvent) {
        if event.is_dir {
            return;
        }

        let Some(dir) = self.resolve_directory(&event.path) else {
            return;
        };

        let filter = self.base_filter.with_patterns(&dir.filters);
        if filter.excludes(&event.path) {
            return;
        }

        match event.op {
            // A move is treated as a create at the destination
            FileOp::Create | FileOp::Modify | FileOp::Move => {
                let meta = match tokio::fs::metadata(&event.path).await {
                    Ok(m) => m,
                    Err(_) => {
                        // File disappeared between the event and the stat
                        debug!(path = %event.path.display(), "Stat failed for event path, ignoring");
                        return;
                    }
                };
                if !meta.is_file() {
                    return;
                }
                if self.exceeds_size_limit(&event.path, meta.len()) {
                    return;
                }
                let Some(remote_key) = dir.remote_key_for(&event.path) else {
                    return;
                };

                let task = SyncTask::upload(event.path.clone(), remote_key);
                match self.upload_tx.try_send(task) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(t)) => {
                        warn!(
                            path = %t.local_path.display(),
                            "Upload queue full, dropping task"
                        );
                        self.metrics.record_dropped_event(DropStage::Queue);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            // Deletion propagation is a non-goal
            FileOp::Delete => {}
        }
    }

    /// Resolves the longest enabled realtime directory containing `path`.
    fn resolve_directory(&self, path: &Path) -> Option<SyncDirectory> {
        let dirs = self.directories.read().unwrap();
        resolve_longest_root(&dirs, path).cloned()
    }

    // ========================================================================
    // Scheduled pass
    // ========================================================================

    /// Interval-driven scheduler: each tick reconciles every scheduled,
    /// enabled directory sequentially.
    async fn run_scheduler(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.scheduled_interval);
        // The immediate first tick would duplicate startup reconciliation.
        ticker.tick().await;

        info!(
            interval_secs = self.options.scheduled_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduled: Vec<SyncDirectory> = {
                        let dirs = self.directories.read().unwrap();
                        dirs.iter()
                            .filter(|d| d.enabled && d.sync_mode.is_scheduled())
                            .cloned()
                            .collect()
                    };

                    for dir in scheduled {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if let Err(e) = self.sync_directory(&dir).await {
                            if matches!(e, SyncError::Cancelled) {
                                break;
                            }
                            error!(
                                local_path = %dir.local_path.display(),
                                error = %e,
                                "Scheduled reconciliation failed"
                            );
                        }
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Temp-file sibling used for atomic downloads.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Upload predicate: absent remotely, newer locally (second resolution),
/// or different size. Digest equality is not required.
fn needs_upload(local_mtime: Option<DateTime<Utc>>, local_size: u64, remote: &FileInfo) -> bool {
    let newer = match (local_mtime, remote.mtime) {
        (Some(local), Some(remote)) => local.timestamp() > remote.timestamp(),
        (Some(_), None) => true,
        (None, _) => false,
    };
    newer || local_size != remote.size
}

/// Picks the directory with the longest local root containing `path`
/// among enabled realtime directories.
fn resolve_longest_root<'a>(dirs: &'a [SyncDirectory], path: &Path) -> Option<&'a SyncDirectory> {
    dirs.iter()
        .filter(|d| d.enabled && d.sync_mode.is_realtime() && d.contains(path))
        .max_by_key(|d| d.local_path.as_os_str().len())
}

/// Enumerates regular files under `root`.
///
/// Directories themselves are never synced. Unreadable entries and
/// subtrees are logged and skipped; only a failure to read the root is
/// fatal to the pass.
async fn collect_local_files(
    root: &Path,
    recursive: bool,
) -> Result<Vec<(PathBuf, std::fs::Metadata)>, SyncError> {
    let mut files = Vec::new();
    walk_dir(root.to_path_buf(), recursive, &mut files).await?;
    Ok(files)
}

/// Boxed recursion over `tokio::fs::read_dir`.
fn walk_dir(
    dir: PathBuf,
    recursive: bool,
    files: &mut Vec<(PathBuf, std::fs::Metadata)>,
) -> Pin<Box<dyn std::future::Future<Output = Result<(), SyncError>> + Send + '_>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| SyncError::local_io(&dir, e))?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Error reading directory entry, skipping rest");
                    break;
                }
            };

            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    // Broken symlink or permission failure on one entry
                    warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if meta.is_file() {
                files.push((entry.path(), meta));
            } else if meta.is_dir() && recursive {
                if let Err(e) = walk_dir(entry.path(), recursive, files).await {
                    warn!(path = %entry.path().display(), error = %e, "Skipping unreadable subtree");
                }
            }
        }

        Ok(())
    })
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(key: &str, size: u64, mtime_secs: i64) -> FileInfo {
        FileInfo {
            key: key.to_string(),
            size,
            mtime: DateTime::from_timestamp(mtime_secs, 0),
            digest_hex: String::new(),
            is_dir: false,
        }
    }

    fn dir(local: &str, remote: &str, mode: cumulus_core::domain::SyncMode) -> SyncDirectory {
        SyncDirectory {
            local_path: PathBuf::from(local),
            remote_path: remote.to_string(),
            sync_mode: mode,
            schedule: String::new(),
            recursive: true,
            filters: Vec::new(),
            enabled: true,
        }
    }

    // -- needs_upload --

    #[test]
    fn needs_upload_when_local_newer() {
        let info = remote("backup/a.txt", 5, 1_000);
        let local_mtime = DateTime::from_timestamp(2_000, 0);
        assert!(needs_upload(local_mtime, 5, &info));
    }

    #[test]
    fn needs_upload_when_sizes_differ() {
        let info = remote("backup/a.txt", 5, 2_000);
        let local_mtime = DateTime::from_timestamp(1_000, 0);
        assert!(needs_upload(local_mtime, 11, &info));
    }

    #[test]
    fn no_upload_when_unchanged() {
        let info = remote("backup/a.txt", 5, 2_000);
        let local_mtime = DateTime::from_timestamp(1_000, 0);
        assert!(!needs_upload(local_mtime, 5, &info));
    }

    #[test]
    fn no_upload_when_equal_mtime_and_size() {
        let info = remote("backup/a.txt", 5, 1_000);
        let local_mtime = DateTime::from_timestamp(1_000, 0);
        assert!(!needs_upload(local_mtime, 5, &info));
    }

    #[test]
    fn needs_upload_when_remote_has_no_mtime() {
        let info = FileInfo {
            key: "backup/a.txt".to_string(),
            size: 5,
            mtime: None,
            digest_hex: String::new(),
            is_dir: false,
        };
        let local_mtime = DateTime::from_timestamp(1_000, 0);
        assert!(needs_upload(local_mtime, 5, &info));
    }

    // -- resolve_longest_root --

    #[test]
    fn resolves_longest_matching_root() {
        use cumulus_core::domain::SyncMode;
        let dirs = vec![
            dir("/tmp/src", "outer", SyncMode::Realtime),
            dir("/tmp/src/nested", "inner", SyncMode::Realtime),
        ];
        let found =
            resolve_longest_root(&dirs, Path::new("/tmp/src/nested/a.txt")).expect("match");
        assert_eq!(found.remote_path, "inner");

        let found = resolve_longest_root(&dirs, Path::new("/tmp/src/b.txt")).expect("match");
        assert_eq!(found.remote_path, "outer");
    }

    #[test]
    fn resolve_skips_disabled_and_scheduled_only() {
        use cumulus_core::domain::SyncMode;
        let mut disabled = dir("/tmp/src", "d", SyncMode::Realtime);
        disabled.enabled = false;
        let scheduled = dir("/tmp/sched", "s", SyncMode::Scheduled);
        let dirs = vec![disabled, scheduled];

        assert!(resolve_longest_root(&dirs, Path::new("/tmp/src/a.txt")).is_none());
        assert!(resolve_longest_root(&dirs, Path::new("/tmp/sched/a.txt")).is_none());
    }

    #[test]
    fn resolve_no_match_outside_roots() {
        use cumulus_core::domain::SyncMode;
        let dirs = vec![dir("/tmp/src", "d", SyncMode::Realtime)];
        assert!(resolve_longest_root(&dirs, Path::new("/var/log/a.txt")).is_none());
    }

    // -- partial_path --

    #[test]
    fn partial_path_is_sibling() {
        let p = partial_path(Path::new("/tmp/dest/a.txt"));
        assert_eq!(p, PathBuf::from("/tmp/dest/a.txt.partial"));
    }

    // -- defaults --

    #[test]
    fn engine_options_defaults_match_config() {
        let opts = EngineOptions::default();
        assert_eq!(opts.max_concurrent_uploads, 5);
        assert_eq!(opts.max_concurrent_downloads, 5);
        assert_eq!(opts.retry_attempts, 3);
        assert_eq!(opts.retry_delay, std::time::Duration::from_secs(5));
        assert_eq!(opts.scheduled_interval, std::time::Duration::from_secs(300));
    }

    #[test]
    fn sync_task_constructors() {
        let task = SyncTask::upload("/tmp/a.txt", "backup/a.txt");
        assert_eq!(task.kind, TaskKind::Upload);
        assert_eq!(task.attempt, 0);
        assert!(task.metadata.is_none());

        let task = SyncTask::download("/tmp/a.txt", "backup/a.txt");
        assert_eq!(task.kind, TaskKind::Download);
    }

    // -- local enumeration --

    #[tokio::test]
    async fn collect_local_files_recursive_and_shallow() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("sub/b.txt"), b"b").unwrap();

        let all = collect_local_files(root.path(), true).await.unwrap();
        assert_eq!(all.len(), 2);

        let shallow = collect_local_files(root.path(), false).await.unwrap();
        assert_eq!(shallow.len(), 1);
        assert!(shallow[0].0.ends_with("a.txt"));
    }

    #[tokio::test]
    async fn collect_local_files_missing_root_is_fatal() {
        let err = collect_local_files(Path::new("/nonexistent/root"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LocalIo { .. }));
    }
}
