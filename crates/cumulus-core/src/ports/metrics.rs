//! Metrics sink port
//!
//! The engine, watcher and batcher publish counters and gauges through
//! this capability set; they never know whether the other end is a
//! Prometheus registry or a plain in-process accumulator. Implementations
//! are internally synchronized.

use std::time::Duration;

use crate::domain::SyncStats;

// ============================================================================
// Label types
// ============================================================================

/// Transfer direction for bandwidth accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// Operation kinds recorded with duration and outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Upload,
    Download,
    Delete,
    /// A full reconciliation pass over one directory
    Sync,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Upload => "upload",
            SyncOperation::Download => "download",
            SyncOperation::Delete => "delete",
            SyncOperation::Sync => "sync",
        }
    }
}

/// Pipeline stage at which an event was dropped due to backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropStage {
    /// The watcher's raw event channel was full
    Watcher,
    /// The batcher's output channel was full
    Batcher,
    /// The engine's upload task channel was full
    Queue,
}

impl DropStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DropStage::Watcher => "watcher",
            DropStage::Batcher => "batcher",
            DropStage::Queue => "queue",
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of everything a sink has accumulated.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Sync counters mirrored from the engine's reporting
    pub stats: SyncStats,
    /// Total bytes sent upward
    pub bandwidth_up: u64,
    /// Total bytes received downward
    pub bandwidth_down: u64,
    /// Last sampled resident memory in bytes
    pub memory_bytes: u64,
    /// Last sampled CPU utilization percentage
    pub cpu_percent: f64,
    /// Last sampled disk usage in bytes
    pub disk_bytes: u64,
    /// Number of live async tasks owned by the service
    pub active_tasks: i64,
    /// Events dropped across all pipeline stages
    pub events_dropped: u64,
}

// ============================================================================
// MetricsSink
// ============================================================================

/// Capability set for publishing metrics.
pub trait MetricsSink: Send + Sync {
    /// Records bytes transferred in the given direction.
    fn record_bandwidth(&self, bytes: u64, direction: Direction);

    /// Records one completed operation with its duration and outcome.
    ///
    /// Successful operations advance the per-kind counters and the
    /// last-sync timestamp; failures advance the error counter.
    fn record_operation(&self, op: SyncOperation, duration: Duration, success: bool);

    /// Records an event dropped because a bounded channel was full.
    fn record_dropped_event(&self, stage: DropStage);

    /// Records current memory usage in bytes.
    fn record_memory(&self, bytes: u64);

    /// Records current CPU utilization as a percentage.
    fn record_cpu(&self, percent: f64);

    /// Records current disk usage in bytes.
    fn record_disk(&self, bytes: u64);

    /// Records the number of live async tasks.
    fn record_active_tasks(&self, count: i64);

    /// Returns a point-in-time snapshot of accumulated metrics.
    fn snapshot(&self) -> MetricsSnapshot;
}
