//! Cumulus Core - domain types and boundaries for the sync agent
//!
//! This crate contains everything the sync engine depends on but that has
//! no moving parts of its own:
//! - Domain entities (SyncDirectory, FileMetadata, FileEvent, SyncStats)
//! - The error taxonomy shared across components
//! - Port definitions (traits for the object store and metrics adapters)
//! - Typed configuration with loading, validation and sample generation

pub mod config;
pub mod domain;
pub mod ports;
