//! Error taxonomy shared across components
//!
//! Every failure a task or adapter can produce is classified here so the
//! retry policy can make a decision without string matching. Transient
//! errors (transport, local I/O) are retried by the engine; everything
//! else short-circuits.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the sync pipeline and its adapters.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad or missing configuration; fatal at startup
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Network, timeout or 5xx-equivalent failure; retryable
    #[error("transport failure: {0}")]
    Transport(String),

    /// Digest mismatch on download or adapter-reported mismatch on upload
    #[error("integrity mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// The remote object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Local stat/open/read/write failure; per-file, retryable
    #[error("i/o error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote rejected the request (validation, precondition, auth)
    #[error("request rejected: {0}")]
    Permanent(String),

    /// Invalid lifecycle transition (e.g. starting a running engine)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation was cancelled; propagated unchanged, never retried
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if the retry policy is allowed to paper over this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::LocalIo { .. })
    }

    /// Convenience constructor for local I/O failures.
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_local_io_are_transient() {
        assert!(SyncError::Transport("connection reset".into()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(SyncError::local_io("/tmp/a", io).is_transient());
    }

    #[test]
    fn permanent_classes_are_not_transient() {
        assert!(!SyncError::Config("missing bucket".into()).is_transient());
        assert!(!SyncError::NotFound("backup/a.txt".into()).is_transient());
        assert!(!SyncError::Permanent("access denied".into()).is_transient());
        assert!(!SyncError::Cancelled.is_transient());
        assert!(!SyncError::Integrity {
            expected: "aa".into(),
            actual: "bb".into()
        }
        .is_transient());
    }

    #[test]
    fn display_formats() {
        let err = SyncError::Integrity {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.to_string(), "integrity mismatch: expected aa, got bb");

        let err = SyncError::NotFound("backup/a.txt".into());
        assert_eq!(err.to_string(), "not found: backup/a.txt");
    }
}
