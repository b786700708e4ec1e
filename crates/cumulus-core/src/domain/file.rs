//! File metadata, remote listing entries and filesystem events

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};

// ============================================================================
// FileMetadata
// ============================================================================

/// Metadata attached to an object on upload or parsed from adapter responses.
///
/// Created once per task (from a local stat plus a streaming hash, or from
/// response headers) and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    /// Payload size in bytes
    pub size: u64,
    /// Last modification time, second resolution
    pub mtime: Option<DateTime<Utc>>,
    /// Hex-encoded MD5 over the payload bytes; empty when unavailable
    pub digest_hex: String,
    /// Media type, derived from the file extension on upload
    pub content_type: String,
    /// POSIX mode string, e.g. "0644"
    pub permissions: String,
    /// Whether server-side encryption was requested for the object
    pub encrypted: bool,
}

// ============================================================================
// FileInfo
// ============================================================================

/// A single entry from a remote listing.
///
/// Lives for one reconciliation pass; keys have the adapter's configured
/// prefix already stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Object key relative to the adapter prefix
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Remote modification time
    pub mtime: Option<DateTime<Utc>>,
    /// Hex digest when the strong entity tag denotes a single-part upload
    pub digest_hex: String,
    /// Whether the key denotes a directory placeholder
    pub is_dir: bool,
}

// ============================================================================
// FileEvent
// ============================================================================

/// Operation carried by a filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Modify,
    Delete,
    Move,
}

impl FileOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOp::Create => "create",
            FileOp::Modify => "modify",
            FileOp::Delete => "delete",
            FileOp::Move => "move",
        }
    }
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filesystem change notification produced by the watcher.
///
/// Immutable once emitted; the batcher keeps only the latest event per
/// path within a window.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Absolute path the event refers to
    pub path: PathBuf,
    /// What happened
    pub op: FileOp,
    /// Whether the path is a directory
    pub is_dir: bool,
    /// Monotonic timestamp of observation
    pub ts: Instant,
}

impl FileEvent {
    /// Creates an event stamped with the current monotonic time.
    pub fn new(path: impl Into<PathBuf>, op: FileOp, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            op,
            is_dir,
            ts: Instant::now(),
        }
    }
}
