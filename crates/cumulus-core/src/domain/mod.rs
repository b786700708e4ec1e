//! Domain entities for the sync agent
//!
//! This module contains the core domain types for Cumulus:
//! - Sync directory configuration records and key mapping
//! - File metadata, remote listing entries and filesystem events
//! - Synchronization statistics
//! - Domain-specific error types

pub mod directory;
pub mod errors;
pub mod file;
pub mod stats;

// Re-export commonly used types
pub use directory::{join_key, SyncDirectory, SyncMode};
pub use errors::SyncError;
pub use file::{FileEvent, FileInfo, FileMetadata, FileOp};
pub use stats::SyncStats;
