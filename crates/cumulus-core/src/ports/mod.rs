//! Port definitions (interfaces the engine depends on)
//!
//! Ports are traits the sync engine consumes; their implementations live
//! in adapter crates. The engine never sees a concrete client type.
//!
//! - [`ObjectStore`] - content-addressed view of a remote namespace
//! - [`MetricsSink`] - capability set for counters, timings and gauges

pub mod metrics;
pub mod object_store;

pub use metrics::{Direction, DropStage, MetricsSink, MetricsSnapshot, SyncOperation};
pub use object_store::{ObjectBody, ObjectStore};
