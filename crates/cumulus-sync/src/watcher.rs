//! Filesystem watcher
//!
//! Wraps the `notify` crate to monitor directory trees and convert raw OS
//! notifications into filtered [`FileEvent`]s on a bounded channel.
//!
//! ## Architecture
//!
//! ```text
//! inotify ──► FsWatcher ──► mpsc::channel ──► EventBatcher ──► SyncEngine
//! ```
//!
//! Roots are registered recursively; the backend extends coverage to
//! directories created after registration. When the event channel is full
//! the excess event is dropped with a warning and a counter increment:
//! under-delivery is tolerated because the scheduled pass and startup
//! reconciliation recover lost updates.

use std::path::Path;
use std::sync::Arc;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use cumulus_core::domain::{FileEvent, FileOp, SyncError};
use cumulus_core::ports::{DropStage, MetricsSink};

use crate::filter::PathFilter;

/// Capacity of the raw event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// FsWatcher
// ============================================================================

/// Watches directory trees using the OS-native notification mechanism.
///
/// On Linux this is inotify. Events are mapped, filtered and pushed into
/// a bounded channel whose receiver is handed out at construction. Stop
/// releases the OS handles and closes the stream; it is idempotent.
pub struct FsWatcher {
    watcher: Option<RecommendedWatcher>,
}

impl FsWatcher {
    /// Creates a watcher and the receiving end of its event stream.
    ///
    /// `filter` is the static exclusion set; filtered events are never
    /// emitted. Dropped events are counted through `metrics`.
    pub fn new(
        filter: PathFilter,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), SyncError> {
        let (event_tx, event_rx) = mpsc::channel::<FileEvent>(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => dispatch_event(&event, &filter, &event_tx, metrics.as_ref()),
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| SyncError::Config(format!("cannot create file watcher: {e}")))?;

        Ok((
            Self {
                watcher: Some(watcher),
            },
            event_rx,
        ))
    }

    /// Starts watching `root` and everything beneath it.
    ///
    /// Failure to register one root is reported to the caller, who logs
    /// and continues with the remaining roots.
    pub fn watch(&mut self, root: &Path) -> Result<(), SyncError> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(SyncError::InvalidState("watcher is stopped".into()));
        };

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::LocalIo {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;

        info!(root = %root.display(), "Watching directory tree");
        Ok(())
    }

    /// Releases OS handles and signals end-of-stream to consumers.
    ///
    /// Dropping the backend drops the channel sender, so receivers observe
    /// a closed stream. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("File watcher stopped");
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Event mapping and dispatch
// ============================================================================

/// Maps a native notification kind to a sync operation.
///
/// Permission-only changes (`Modify(Metadata)`) and access events are
/// suppressed; they do not affect file content.
fn map_event_op(kind: &EventKind) -> Option<FileOp> {
    match kind {
        EventKind::Create(_) => Some(FileOp::Create),
        EventKind::Modify(ModifyKind::Data(_)) => Some(FileOp::Modify),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        // The rename-from half is covered by the matching rename-to event
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => None,
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Move),
        EventKind::Modify(_) => Some(FileOp::Modify),
        EventKind::Remove(_) => Some(FileOp::Delete),
        _ => None,
    }
}

/// Converts, filters and forwards one native event.
///
/// Runs on the notify callback thread, so sending is non-blocking: a full
/// channel drops the event with a warning and a counter increment.
fn dispatch_event(
    event: &notify::Event,
    filter: &PathFilter,
    tx: &mpsc::Sender<FileEvent>,
    metrics: &dyn MetricsSink,
) {
    let Some(op) = map_event_op(&event.kind) else {
        return;
    };

    // Rename events carry [from, to]; everything else uses the first path.
    let path = match op {
        FileOp::Move => event.paths.last(),
        _ => event.paths.first(),
    };
    let Some(path) = path else {
        return;
    };

    if filter.excludes(path) {
        return;
    }

    let is_dir = std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);
    let file_event = FileEvent::new(path.clone(), op, is_dir);

    debug!(path = %path.display(), op = %op, is_dir, "File event detected");

    match tx.try_send(file_event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(ev)) => {
            warn!(path = %ev.path.display(), op = %ev.op, "Event channel full, dropping event");
            metrics.record_dropped_event(DropStage::Watcher);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // Consumer has shut down; nothing left to deliver to.
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
