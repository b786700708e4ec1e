//! Sync directory configuration records
//!
//! A [`SyncDirectory`] describes one local tree mirrored to the object
//! store. Directories are read-only after configuration validation; the
//! engine takes a snapshot at registration time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// SyncMode
// ============================================================================

/// Selects which pipelines a directory participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Sync on filesystem change notifications
    Realtime,
    /// Sync on the scheduler tick
    Scheduled,
    /// Both realtime and scheduled
    Both,
}

impl SyncMode {
    /// Returns true if the directory should feed from the watcher pipeline.
    pub fn is_realtime(self) -> bool {
        matches!(self, SyncMode::Realtime | SyncMode::Both)
    }

    /// Returns true if the directory is visited by the scheduled pass.
    pub fn is_scheduled(self) -> bool {
        matches!(self, SyncMode::Scheduled | SyncMode::Both)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncMode::Realtime => "realtime",
            SyncMode::Scheduled => "scheduled",
            SyncMode::Both => "both",
        };
        f.write_str(s)
    }
}

// ============================================================================
// SyncDirectory
// ============================================================================

/// A local directory tree mirrored to the object store under a key prefix.
///
/// Invariants enforced by configuration validation:
/// - `local_path` is absolute
/// - `schedule` is non-empty when `sync_mode` is scheduled or both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDirectory {
    /// Absolute root of the local subtree
    pub local_path: PathBuf,
    /// Remote key prefix this tree maps to (forward-slash separated)
    #[serde(default)]
    pub remote_path: String,
    /// Which pipelines this directory participates in
    pub sync_mode: SyncMode,
    /// Cron expression for scheduled sync (required for scheduled/both)
    #[serde(default)]
    pub schedule: String,
    /// Whether subdirectories are walked during reconciliation
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Glob patterns excluded from sync, matched against basenames
    #[serde(default)]
    pub filters: Vec<String>,
    /// Whether this directory is part of the runtime set
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SyncDirectory {
    /// Returns true if `path` lies under this directory's local root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.local_path)
    }

    /// Computes the remote key for a local path under this directory.
    ///
    /// Returns `None` when the path is not inside `local_path`. Keys are
    /// always forward-slash separated regardless of host OS.
    pub fn remote_key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.local_path).ok()?;
        Some(join_key(&self.remote_path, &rel.to_string_lossy()))
    }
}

/// Joins a key prefix with a relative path using forward slashes.
///
/// Backslashes in `rest` are normalized, leading/trailing separators are
/// trimmed so the result never contains empty segments at the seam.
pub fn join_key(prefix: &str, rest: &str) -> String {
    let rest = rest.replace('\\', "/");
    let rest = rest.trim_start_matches('/');
    let prefix = prefix.trim_end_matches('/');

    if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}
