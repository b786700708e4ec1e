//! Periodic system gauge collector
//!
//! Samples memory, CPU and disk usage on a fixed interval and publishes
//! them through the metrics sink. CPU percentages are meaningful from the
//! second sample onward since they are computed between refreshes.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cumulus_core::ports::MetricsSink;

/// Background task sampling system gauges into a sink.
pub struct SystemCollector {
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
}

impl SystemCollector {
    pub fn new(sink: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self { sink, interval }
    }

    /// Spawns the sampling loop; it runs until the token is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = tokio::time::interval(self.interval);

            info!(
                interval_secs = self.interval.as_secs(),
                "System metrics collector started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sample(&mut system);
                    }
                }
            }

            info!("System metrics collector stopped");
        })
    }

    fn sample(&self, system: &mut System) {
        system.refresh_memory();
        system.refresh_cpu_usage();

        let memory = system.used_memory();
        let cpu = f64::from(system.global_cpu_usage());
        self.sink.record_memory(memory);
        self.sink.record_cpu(cpu);

        let disks = Disks::new_with_refreshed_list();
        let disk_used: u64 = disks
            .list()
            .iter()
            .filter(|d| d.mount_point() == std::path::Path::new("/"))
            .map(|d| d.total_space().saturating_sub(d.available_space()))
            .sum();
        if disk_used > 0 {
            self.sink.record_disk(disk_used);
        }

        debug!(memory, cpu, disk_used, "Sampled system metrics");
    }
}
