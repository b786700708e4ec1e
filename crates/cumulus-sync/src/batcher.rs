//! Event batcher
//!
//! Reduces event storms (editors writing in bursts, build systems touching
//! many files) to a single effective event per path per window. The map is
//! flushed on a fixed tick; within a window, the last event observed for a
//! path wins. Order within a flush is unspecified since paths are
//! independent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cumulus_core::domain::FileEvent;
use cumulus_core::ports::{DropStage, MetricsSink};

/// Capacity of the batched event channel.
const BATCH_CHANNEL_CAPACITY: usize = 1024;

/// Default flush window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(2);

// ============================================================================
// EventBatcher
// ============================================================================

/// Coalesces raw watcher events by path over a fixed window.
pub struct EventBatcher {
    window: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl EventBatcher {
    /// Creates a batcher flushing every `window`.
    pub fn new(window: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { window, metrics }
    }

    /// Spawns the batching task over `input`.
    ///
    /// Returns the batched stream and the task handle. The task terminates
    /// after a final flush when the input channel closes; the output
    /// channel closes with it.
    pub fn spawn(
        self,
        mut input: mpsc::Receiver<FileEvent>,
    ) -> (mpsc::Receiver<FileEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, FileEvent> = HashMap::new();
            let mut ticker = tokio::time::interval(self.window);
            // The first tick completes immediately; skip it so the first
            // window has the full duration.
            ticker.tick().await;

            info!(window_ms = self.window.as_millis() as u64, "Event batcher started");

            loop {
                tokio::select! {
                    event = input.recv() => {
                        match event {
                            Some(ev) => {
                                // Last-write-wins per path
                                pending.insert(ev.path.clone(), ev);
                            }
                            None => {
                                flush(&mut pending, &tx, self.metrics.as_ref()).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        flush(&mut pending, &tx, self.metrics.as_ref()).await;
                    }
                }
            }

            info!("Event batcher stopped");
        });

        (rx, handle)
    }
}

/// Sends all pending events downstream and clears the map.
///
/// A full output channel drops the offending event with a counter
/// increment, mirroring the watcher's overflow policy.
async fn flush(
    pending: &mut HashMap<PathBuf, FileEvent>,
    tx: &mpsc::Sender<FileEvent>,
    metrics: &dyn MetricsSink,
) {
    if pending.is_empty() {
        return;
    }

    debug!(count = pending.len(), "Flushing batched events");

    for (_, event) in pending.drain() {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!(
                    path = %ev.path.display(),
                    op = %ev.op,
                    "Batched event channel full, dropping event"
                );
                metrics.record_dropped_event(DropStage::Batcher);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
