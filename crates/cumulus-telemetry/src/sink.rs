//! Metrics sink implementations
//!
//! [`PrometheusSink`] keeps a namespaced registry for scraping plus an
//! in-process mirror for snapshots; [`SimpleSink`] keeps only the mirror
//! and is used when the metrics endpoint is disabled. Both are internally
//! synchronized.

use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use cumulus_core::ports::{Direction, DropStage, MetricsSink, MetricsSnapshot, SyncOperation};

// ============================================================================
// Snapshot mirror
// ============================================================================

/// Applies one operation record to a snapshot.
fn apply_operation(snapshot: &mut MetricsSnapshot, op: SyncOperation, success: bool) {
    if success {
        match op {
            SyncOperation::Upload => snapshot.stats.files_uploaded += 1,
            SyncOperation::Download => snapshot.stats.files_downloaded += 1,
            SyncOperation::Delete => snapshot.stats.files_deleted += 1,
            SyncOperation::Sync => {}
        }
        snapshot.stats.last_sync = Some(Utc::now());
    } else {
        snapshot.stats.sync_errors += 1;
    }
}

/// Applies a bandwidth record to a snapshot.
fn apply_bandwidth(snapshot: &mut MetricsSnapshot, bytes: u64, direction: Direction) {
    match direction {
        Direction::Upload => {
            snapshot.bandwidth_up += bytes;
            snapshot.stats.bytes_uploaded += bytes;
        }
        Direction::Download => {
            snapshot.bandwidth_down += bytes;
            snapshot.stats.bytes_downloaded += bytes;
        }
    }
}

// ============================================================================
// PrometheusSink
// ============================================================================

/// Prometheus-backed metrics sink.
///
/// All metrics live in a registry with the `cumulus` namespace so the
/// exposition output reads `cumulus_files_uploaded_total` etc.
pub struct PrometheusSink {
    registry: Registry,

    files_uploaded: IntCounter,
    files_downloaded: IntCounter,
    files_deleted: IntCounter,
    bytes_uploaded: IntCounter,
    bytes_downloaded: IntCounter,
    sync_errors: IntCounter,
    file_operations: IntCounterVec,
    operation_duration: HistogramVec,
    events_dropped: IntCounterVec,
    last_sync_timestamp: Gauge,
    memory_usage: Gauge,
    cpu_usage: Gauge,
    disk_usage: Gauge,
    active_tasks: IntGauge,

    snapshot: RwLock<MetricsSnapshot>,
}

impl PrometheusSink {
    /// Creates the sink with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("cumulus".to_string()), None)?;

        let files_uploaded =
            IntCounter::with_opts(Opts::new("files_uploaded_total", "Total files uploaded"))?;
        registry.register(Box::new(files_uploaded.clone()))?;

        let files_downloaded = IntCounter::with_opts(Opts::new(
            "files_downloaded_total",
            "Total files downloaded",
        ))?;
        registry.register(Box::new(files_downloaded.clone()))?;

        let files_deleted =
            IntCounter::with_opts(Opts::new("files_deleted_total", "Total files deleted"))?;
        registry.register(Box::new(files_deleted.clone()))?;

        let bytes_uploaded =
            IntCounter::with_opts(Opts::new("bytes_uploaded_total", "Total bytes uploaded"))?;
        registry.register(Box::new(bytes_uploaded.clone()))?;

        let bytes_downloaded = IntCounter::with_opts(Opts::new(
            "bytes_downloaded_total",
            "Total bytes downloaded",
        ))?;
        registry.register(Box::new(bytes_downloaded.clone()))?;

        let sync_errors =
            IntCounter::with_opts(Opts::new("sync_errors_total", "Total synchronization errors"))?;
        registry.register(Box::new(sync_errors.clone()))?;

        let file_operations = IntCounterVec::new(
            Opts::new(
                "file_operations_total",
                "Total file operations by type and status",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(file_operations.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "operation_duration_seconds",
                "Duration of file operations in seconds",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let events_dropped = IntCounterVec::new(
            Opts::new(
                "events_dropped_total",
                "Events dropped on full channels by stage",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(events_dropped.clone()))?;

        let last_sync_timestamp = Gauge::with_opts(Opts::new(
            "last_sync_timestamp",
            "Unix timestamp of the last successful operation",
        ))?;
        registry.register(Box::new(last_sync_timestamp.clone()))?;

        let memory_usage = Gauge::with_opts(Opts::new(
            "memory_usage_bytes",
            "Current memory usage in bytes",
        ))?;
        registry.register(Box::new(memory_usage.clone()))?;

        let cpu_usage = Gauge::with_opts(Opts::new(
            "cpu_usage_percent",
            "Current CPU usage percentage",
        ))?;
        registry.register(Box::new(cpu_usage.clone()))?;

        let disk_usage = Gauge::with_opts(Opts::new(
            "disk_usage_bytes",
            "Current disk usage in bytes",
        ))?;
        registry.register(Box::new(disk_usage.clone()))?;

        let active_tasks = IntGauge::with_opts(Opts::new(
            "active_tasks",
            "Number of live service tasks",
        ))?;
        registry.register(Box::new(active_tasks.clone()))?;

        Ok(Self {
            registry,
            files_uploaded,
            files_downloaded,
            files_deleted,
            bytes_uploaded,
            bytes_downloaded,
            sync_errors,
            file_operations,
            operation_duration,
            events_dropped,
            last_sync_timestamp,
            memory_usage,
            cpu_usage,
            disk_usage,
            active_tasks,
            snapshot: RwLock::new(MetricsSnapshot::default()),
        })
    }

    /// Encodes all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricsSink for PrometheusSink {
    fn record_bandwidth(&self, bytes: u64, direction: Direction) {
        match direction {
            Direction::Upload => self.bytes_uploaded.inc_by(bytes),
            Direction::Download => self.bytes_downloaded.inc_by(bytes),
        }
        apply_bandwidth(&mut self.snapshot.write().unwrap(), bytes, direction);
    }

    fn record_operation(&self, op: SyncOperation, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        self.file_operations
            .with_label_values(&[op.as_str(), status])
            .inc();
        self.operation_duration
            .with_label_values(&[op.as_str()])
            .observe(duration.as_secs_f64());

        if success {
            match op {
                SyncOperation::Upload => self.files_uploaded.inc(),
                SyncOperation::Download => self.files_downloaded.inc(),
                SyncOperation::Delete => self.files_deleted.inc(),
                SyncOperation::Sync => {}
            }
            self.last_sync_timestamp.set(Utc::now().timestamp() as f64);
        } else {
            self.sync_errors.inc();
        }

        apply_operation(&mut self.snapshot.write().unwrap(), op, success);
    }

    fn record_dropped_event(&self, stage: DropStage) {
        self.events_dropped.with_label_values(&[stage.as_str()]).inc();
        self.snapshot.write().unwrap().events_dropped += 1;
    }

    fn record_memory(&self, bytes: u64) {
        self.memory_usage.set(bytes as f64);
        self.snapshot.write().unwrap().memory_bytes = bytes;
    }

    fn record_cpu(&self, percent: f64) {
        self.cpu_usage.set(percent);
        self.snapshot.write().unwrap().cpu_percent = percent;
    }

    fn record_disk(&self, bytes: u64) {
        self.disk_usage.set(bytes as f64);
        self.snapshot.write().unwrap().disk_bytes = bytes;
    }

    fn record_active_tasks(&self, count: i64) {
        self.active_tasks.set(count);
        self.snapshot.write().unwrap().active_tasks = count;
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.read().unwrap().clone()
    }
}

// ============================================================================
// SimpleSink
// ============================================================================

/// In-process metrics accumulator used when the endpoint is disabled.
#[derive(Default)]
pub struct SimpleSink {
    snapshot: RwLock<MetricsSnapshot>,
}

impl SimpleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for SimpleSink {
    fn record_bandwidth(&self, bytes: u64, direction: Direction) {
        apply_bandwidth(&mut self.snapshot.write().unwrap(), bytes, direction);
    }

    fn record_operation(&self, op: SyncOperation, _duration: Duration, success: bool) {
        apply_operation(&mut self.snapshot.write().unwrap(), op, success);
    }

    fn record_dropped_event(&self, _stage: DropStage) {
        self.snapshot.write().unwrap().events_dropped += 1;
    }

    fn record_memory(&self, bytes: u64) {
        self.snapshot.write().unwrap().memory_bytes = bytes;
    }

    fn record_cpu(&self, percent: f64) {
        self.snapshot.write().unwrap().cpu_percent = percent;
    }

    fn record_disk(&self, bytes: u64) {
        self.snapshot.write().unwrap().disk_bytes = bytes;
    }

    fn record_active_tasks(&self, count: i64) {
        self.snapshot.write().unwrap().active_tasks = count;
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.read().unwrap().clone()
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_sink_encodes_counters() {
        let sink = PrometheusSink::new().expect("create sink");
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(10), true);
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(10), true);
        sink.record_operation(SyncOperation::Download, Duration::from_millis(5), false);
        sink.record_bandwidth(2048, Direction::Upload);

        let output = sink.encode().expect("encode");
        assert!(output.contains("cumulus_files_uploaded_total 2"));
        assert!(output.contains("cumulus_sync_errors_total 1"));
        assert!(output.contains("cumulus_bytes_uploaded_total 2048"));
        assert!(output.contains("cumulus_file_operations_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn prometheus_sink_snapshot_mirrors_registry() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(1), true);
        sink.record_bandwidth(5, Direction::Upload);
        sink.record_bandwidth(7, Direction::Download);
        sink.record_dropped_event(DropStage::Watcher);
        sink.record_memory(1024);
        sink.record_active_tasks(12);

        let snap = sink.snapshot();
        assert_eq!(snap.stats.files_uploaded, 1);
        assert_eq!(snap.stats.bytes_uploaded, 5);
        assert_eq!(snap.stats.bytes_downloaded, 7);
        assert_eq!(snap.bandwidth_up, 5);
        assert_eq!(snap.bandwidth_down, 7);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.memory_bytes, 1024);
        assert_eq!(snap.active_tasks, 12);
        assert!(snap.stats.last_sync.is_some());
    }

    #[test]
    fn sync_operation_does_not_advance_file_counters() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_operation(SyncOperation::Sync, Duration::from_millis(1), true);

        let snap = sink.snapshot();
        assert_eq!(snap.stats.files_uploaded, 0);
        assert!(snap.stats.last_sync.is_some());
    }

    #[test]
    fn dropped_events_by_stage() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_dropped_event(DropStage::Watcher);
        sink.record_dropped_event(DropStage::Batcher);
        sink.record_dropped_event(DropStage::Queue);

        let output = sink.encode().unwrap();
        assert!(output.contains("stage=\"watcher\""));
        assert!(output.contains("stage=\"batcher\""));
        assert!(output.contains("stage=\"queue\""));
        assert_eq!(sink.snapshot().events_dropped, 3);
    }

    #[test]
    fn simple_sink_accumulates() {
        let sink = SimpleSink::new();
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(1), true);
        sink.record_operation(SyncOperation::Delete, Duration::from_millis(1), true);
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(1), false);
        sink.record_bandwidth(100, Direction::Upload);
        sink.record_cpu(12.5);

        let snap = sink.snapshot();
        assert_eq!(snap.stats.files_uploaded, 1);
        assert_eq!(snap.stats.files_deleted, 1);
        assert_eq!(snap.stats.sync_errors, 1);
        assert_eq!(snap.stats.bytes_uploaded, 100);
        assert_eq!(snap.cpu_percent, 12.5);
    }
}
