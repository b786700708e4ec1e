//! End-to-end engine scenarios against an in-memory object store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use cumulus_core::domain::{
    FileEvent, FileInfo, FileMetadata, FileOp, SyncDirectory, SyncError, SyncMode,
};
use cumulus_core::ports::{
    Direction, DropStage, MetricsSink, MetricsSnapshot, ObjectBody, ObjectStore, SyncOperation,
};
use cumulus_sync::engine::{EngineOptions, SyncEngine, SyncTask};
use cumulus_sync::filter::PathFilter;

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: FileMetadata,
}

/// In-memory object store with transient-failure and slowness injection.
#[derive(Default)]
struct MemoryStore {
    objects: std::sync::Mutex<HashMap<String, StoredObject>>,
    puts: AtomicU64,
    /// Remaining uploads that fail with a transient error
    fail_uploads: AtomicU32,
    /// Artificial delay applied to every upload
    upload_delay: Option<Duration>,
}

impl MemoryStore {
    fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn insert(&self, key: &str, data: &[u8], metadata: FileMetadata) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                metadata,
            },
        );
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        metadata: &FileMetadata,
    ) -> Result<(), SyncError> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .fail_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Transport("injected failure".into()));
        }

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| SyncError::local_io(source, e))?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<(ObjectBody, FileMetadata), SyncError> {
        let obj = self
            .object(key)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        Ok((Box::new(std::io::Cursor::new(obj.data)), obj.metadata))
    }

    async fn delete(&self, key: &str) -> Result<(), SyncError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, SyncError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| FileInfo {
                key: key.clone(),
                size: obj.metadata.size,
                mtime: obj.metadata.mtime,
                digest_hex: obj.metadata.digest_hex.clone(),
                is_dir: false,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<FileMetadata, SyncError> {
        self.object(key)
            .map(|obj| obj.metadata)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))
    }
}

/// Sink recording just enough for assertions.
#[derive(Default)]
struct RecordingSink {
    files_uploaded: AtomicU64,
    sync_errors: AtomicU64,
    dropped: AtomicU64,
}

impl MetricsSink for RecordingSink {
    fn record_bandwidth(&self, _bytes: u64, _direction: Direction) {}

    fn record_operation(&self, op: SyncOperation, _duration: Duration, success: bool) {
        if success {
            if op == SyncOperation::Upload {
                self.files_uploaded.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            self.sync_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_dropped_event(&self, _stage: DropStage) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    fn record_memory(&self, _bytes: u64) {}
    fn record_cpu(&self, _percent: f64) {}
    fn record_disk(&self, _bytes: u64) {}
    fn record_active_tasks(&self, _count: i64) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_dropped: self.dropped.load(Ordering::SeqCst),
            ..Default::default()
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    engine: Arc<SyncEngine>,
    events: mpsc::Sender<FileEvent>,
    root: tempfile::TempDir,
}

/// Builds a running engine over one realtime+scheduled directory rooted in
/// a fresh tempdir mapped to the `backup` prefix.
fn start_engine(store: MemoryStore, options: EngineOptions) -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        PathFilter::default(),
        options,
    ));

    engine.add_directory(SyncDirectory {
        local_path: root.path().to_path_buf(),
        remote_path: "backup".to_string(),
        sync_mode: SyncMode::Both,
        schedule: "*/5 * * * *".to_string(),
        recursive: true,
        filters: vec!["*.tmp".to_string()],
        enabled: true,
    });

    let (events, events_rx) = mpsc::channel(64);
    engine.start(events_rx).expect("engine start");

    Harness {
        store,
        sink,
        engine,
        events,
        root,
    }
}

fn fast_options() -> EngineOptions {
    EngineOptions {
        retry_delay: Duration::from_millis(20),
        ..EngineOptions::default()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

fn send_event(harness: &Harness, name: &str, op: FileOp) {
    let path = harness.root.path().join(name);
    harness
        .events
        .try_send(FileEvent::new(path, op, false))
        .expect("event channel open");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn fresh_upload_records_size_and_digest() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    std::fs::write(harness.root.path().join("a.txt"), b"hello").unwrap();

    send_event(&harness, "a.txt", FileOp::Create);

    let store = Arc::clone(&harness.store);
    assert!(
        wait_until(|| store.object("backup/a.txt").is_some(), Duration::from_secs(5)).await,
        "upload should arrive"
    );

    let obj = harness.store.object("backup/a.txt").unwrap();
    assert_eq!(obj.metadata.size, 5);
    assert_eq!(obj.metadata.digest_hex, "5d41402abc4b2a76b9719d911017c592");
    assert_eq!(obj.data, b"hello");
    assert_eq!(obj.metadata.content_type, "text/plain");

    harness.engine.stop().await;
    assert_eq!(harness.engine.stats().files_uploaded, 1);
    assert_eq!(harness.engine.stats().bytes_uploaded, 5);
}

#[tokio::test]
async fn reconciliation_is_a_noop_when_unchanged() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    std::fs::write(harness.root.path().join("a.txt"), b"hello").unwrap();

    let dir = harness.engine.directories()[0].clone();
    harness.engine.sync_directory(&dir).await.unwrap();

    let store = Arc::clone(&harness.store);
    assert!(wait_until(|| store.put_count() == 1, Duration::from_secs(5)).await);

    // Second pass over an unchanged tree enqueues nothing
    harness.engine.sync_directory(&dir).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.store.put_count(), 1, "no-op pass must not re-upload");

    harness.engine.stop().await;
}

#[tokio::test]
async fn size_change_triggers_overwrite() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    let file = harness.root.path().join("a.txt");
    std::fs::write(&file, b"hello").unwrap();

    send_event(&harness, "a.txt", FileOp::Create);
    let store = Arc::clone(&harness.store);
    assert!(wait_until(|| store.put_count() == 1, Duration::from_secs(5)).await);

    std::fs::write(&file, b"hello world").unwrap();
    send_event(&harness, "a.txt", FileOp::Modify);

    let store = Arc::clone(&harness.store);
    assert!(
        wait_until(|| store.put_count() == 2, Duration::from_secs(5)).await,
        "modified file should re-upload"
    );

    let obj = harness.store.object("backup/a.txt").unwrap();
    assert_eq!(obj.metadata.size, 11);
    assert_eq!(obj.metadata.digest_hex, "3e25960a79dbc69b674cd4ec67a72c62");

    harness.engine.stop().await;
}

#[tokio::test]
async fn filtered_files_never_upload() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    std::fs::write(harness.root.path().join("b.tmp"), b"scratch").unwrap();

    send_event(&harness, "b.tmp", FileOp::Create);

    // Also exercise reconciliation with the same exclusion
    let dir = harness.engine.directories()[0].clone();
    harness.engine.sync_directory(&dir).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.store.put_count(), 0);
    // The event never entered the pipeline, so nothing counts as dropped
    assert_eq!(harness.sink.snapshot().events_dropped, 0);

    harness.engine.stop().await;
}

#[tokio::test]
async fn transient_failure_retries_to_success() {
    let store = MemoryStore {
        fail_uploads: AtomicU32::new(1),
        ..MemoryStore::default()
    };
    let harness = start_engine(store, fast_options());
    std::fs::write(harness.root.path().join("a.txt"), b"hello").unwrap();

    send_event(&harness, "a.txt", FileOp::Create);

    let store = Arc::clone(&harness.store);
    assert!(
        wait_until(|| store.put_count() == 1, Duration::from_secs(5)).await,
        "retry should succeed"
    );

    harness.engine.stop().await;

    // Exactly one successful upload; retry-only errors are not task failures
    assert_eq!(harness.sink.files_uploaded.load(Ordering::SeqCst), 1);
    assert_eq!(harness.sink.sync_errors.load(Ordering::SeqCst), 0);
    assert_eq!(harness.engine.stats().files_uploaded, 1);
    assert_eq!(harness.engine.stats().sync_errors, 0);
}

#[tokio::test]
async fn permanent_failure_exhausts_retries_and_counts_error() {
    let store = MemoryStore {
        // More injected failures than retry attempts
        fail_uploads: AtomicU32::new(10),
        ..MemoryStore::default()
    };
    let options = EngineOptions {
        retry_attempts: 2,
        retry_delay: Duration::from_millis(10),
        ..EngineOptions::default()
    };
    let harness = start_engine(store, options);
    std::fs::write(harness.root.path().join("a.txt"), b"hello").unwrap();

    send_event(&harness, "a.txt", FileOp::Create);

    let engine = Arc::clone(&harness.engine);
    assert!(
        wait_until(|| engine.stats().sync_errors == 1, Duration::from_secs(5)).await,
        "exhausted retries should count one task error"
    );
    assert_eq!(harness.store.put_count(), 0);

    harness.engine.stop().await;
}

#[tokio::test]
async fn stop_mid_transfer_returns_promptly_and_is_idempotent() {
    let store = MemoryStore {
        upload_delay: Some(Duration::from_secs(30)),
        ..MemoryStore::default()
    };
    let harness = start_engine(store, fast_options());
    std::fs::write(harness.root.path().join("big.bin"), vec![0u8; 1024]).unwrap();

    send_event(&harness, "big.bin", FileOp::Create);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    harness.engine.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop must not wait out the slow transfer"
    );

    // Safe to call twice
    harness.engine.stop().await;

    // The local file is untouched and no upload completed
    assert_eq!(
        std::fs::read(harness.root.path().join("big.bin")).unwrap().len(),
        1024
    );
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    let (_tx, rx) = mpsc::channel(4);
    let err = harness.engine.start(rx).unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
    harness.engine.stop().await;
}

#[tokio::test]
async fn event_for_vanished_file_is_ignored() {
    let harness = start_engine(MemoryStore::default(), fast_options());

    // No file is created; the stat fails and the event is dropped silently
    send_event(&harness, "ghost.txt", FileOp::Create);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.store.put_count(), 0);
    assert_eq!(harness.engine.stats().sync_errors, 0);

    harness.engine.stop().await;
}

#[tokio::test]
async fn oversized_files_are_skipped() {
    let options = EngineOptions {
        max_file_size: 4,
        ..fast_options()
    };
    let harness = start_engine(MemoryStore::default(), options);
    std::fs::write(harness.root.path().join("a.txt"), b"hello").unwrap();

    let dir = harness.engine.directories()[0].clone();
    harness.engine.sync_directory(&dir).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.store.put_count(), 0);

    harness.engine.stop().await;
}

#[tokio::test]
async fn download_writes_verified_bytes() {
    let harness = start_engine(MemoryStore::default(), fast_options());

    let metadata = FileMetadata {
        size: 5,
        mtime: chrono::DateTime::from_timestamp(1_700_000_000, 0),
        digest_hex: "5d41402abc4b2a76b9719d911017c592".to_string(),
        content_type: "text/plain".to_string(),
        permissions: "0644".to_string(),
        encrypted: false,
    };
    harness.store.insert("backup/restore.txt", b"hello", metadata);

    let dest = harness.root.path().join("restored/restore.txt");
    harness
        .engine
        .enqueue_task(SyncTask::download(dest.clone(), "backup/restore.txt"))
        .await
        .unwrap();

    assert!(
        wait_until(|| dest.exists(), Duration::from_secs(5)).await,
        "download should materialize the file"
    );
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

    // mtime restored from metadata
    let mtime = std::fs::metadata(&dest).unwrap().modified().unwrap();
    let secs = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(secs, 1_700_000_000);

    harness.engine.stop().await;
    assert_eq!(harness.engine.stats().files_downloaded, 1);
    assert_eq!(harness.engine.stats().bytes_downloaded, 5);
}

#[tokio::test]
async fn corrupt_download_retains_no_partial_file() {
    let harness = start_engine(MemoryStore::default(), fast_options());

    let metadata = FileMetadata {
        size: 5,
        mtime: None,
        // Advertised digest does not match the stored bytes
        digest_hex: "00000000000000000000000000000000".to_string(),
        content_type: String::new(),
        permissions: String::new(),
        encrypted: false,
    };
    harness.store.insert("backup/bad.txt", b"hello", metadata);

    let dest = harness.root.path().join("bad.txt");
    harness
        .engine
        .enqueue_task(SyncTask::download(dest.clone(), "backup/bad.txt"))
        .await
        .unwrap();

    let engine = Arc::clone(&harness.engine);
    assert!(
        wait_until(|| engine.stats().sync_errors == 1, Duration::from_secs(5)).await,
        "integrity failure should be recorded"
    );
    assert!(!dest.exists(), "target must not exist");
    assert!(
        !dest.with_file_name("bad.txt.partial").exists(),
        "partial file must be removed"
    );

    harness.engine.stop().await;
}

#[tokio::test]
async fn zero_byte_file_uploads_with_empty_digest() {
    let harness = start_engine(MemoryStore::default(), fast_options());
    std::fs::write(harness.root.path().join("empty.txt"), b"").unwrap();

    send_event(&harness, "empty.txt", FileOp::Create);

    let store = Arc::clone(&harness.store);
    assert!(wait_until(|| store.put_count() == 1, Duration::from_secs(5)).await);

    let obj = harness.store.object("backup/empty.txt").unwrap();
    assert_eq!(obj.metadata.size, 0);
    assert_eq!(obj.metadata.digest_hex, "d41d8cd98f00b204e9800998ecf8427e");

    harness.engine.stop().await;
}
