//! Cumulus Sync - the synchronization pipeline
//!
//! Provides:
//! - A filesystem watcher emitting filtered change events
//! - An event batcher coalescing bursts per path
//! - The sync engine: worker pools, retry policy, reconciliation and the
//!   scheduled pass

pub mod batcher;
pub mod engine;
pub mod filter;
pub mod fsutil;
pub mod watcher;

pub use batcher::EventBatcher;
pub use engine::{EngineOptions, SyncEngine, SyncTask, TaskKind};
pub use filter::PathFilter;
pub use watcher::FsWatcher;
