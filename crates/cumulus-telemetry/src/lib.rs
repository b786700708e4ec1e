//! Cumulus Telemetry - metrics collection and exposure
//!
//! Provides the two [`MetricsSink`](cumulus_core::ports::MetricsSink)
//! implementations (Prometheus-backed and plain in-process), the HTTP
//! exposition server and the periodic system-gauge collector.

pub mod server;
pub mod sink;
pub mod system;

pub use server::MetricsServer;
pub use sink::{PrometheusSink, SimpleSink};
pub use system::SystemCollector;
