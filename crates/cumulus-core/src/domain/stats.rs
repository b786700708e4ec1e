//! Synchronization statistics
//!
//! Process-lifetime counters owned by the engine and read concurrently
//! through snapshots. All counters are monotonically non-decreasing.

use chrono::{DateTime, Utc};

/// Counters describing the engine's work since start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Files successfully uploaded
    pub files_uploaded: u64,
    /// Files successfully downloaded
    pub files_downloaded: u64,
    /// Files successfully deleted remotely
    pub files_deleted: u64,
    /// Bytes transferred upward
    pub bytes_uploaded: u64,
    /// Bytes transferred downward
    pub bytes_downloaded: u64,
    /// Tasks that failed after exhausting retries
    pub sync_errors: u64,
    /// Wall-clock time of the last successful operation
    pub last_sync: Option<DateTime<Utc>>,
    /// Number of directories registered with the engine
    pub active_directories: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zeroed() {
        let stats = SyncStats::default();
        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.bytes_uploaded, 0);
        assert_eq!(stats.sync_errors, 0);
        assert!(stats.last_sync.is_none());
        assert_eq!(stats.active_directories, 0);
    }
}
