//! Service orchestrator
//!
//! Constructs the components in dependency order (metrics sink → watcher
//! → adapter → engine), registers the configured directories, drives the
//! startup reconciliation and owns graceful shutdown. Reconfiguration is
//! a stop-then-start of freshly built components with rollback when the
//! new configuration fails to initialize.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cumulus_core::config::{Config, PerformanceConfig, SecurityConfig};
use cumulus_core::domain::{FileEvent, SyncError, SyncStats};
use cumulus_core::ports::{MetricsSink, MetricsSnapshot, ObjectStore};
use cumulus_s3::{S3ObjectStore, S3Options};
use cumulus_sync::batcher::{EventBatcher, DEFAULT_BATCH_WINDOW};
use cumulus_sync::engine::{EngineOptions, SyncEngine};
use cumulus_sync::filter::PathFilter;
use cumulus_sync::watcher::FsWatcher;
use cumulus_telemetry::{MetricsServer, PrometheusSink, SimpleSink, SystemCollector};

/// Period of the scheduled reconciliation pass.
const SCHEDULED_INTERVAL: Duration = Duration::from_secs(300);

// ============================================================================
// Configuration mapping
// ============================================================================

/// Maps configuration onto the S3 adapter options.
fn s3_options_from(config: &Config) -> S3Options {
    S3Options {
        region: config.aws.region.clone(),
        bucket: config.aws.s3_bucket.clone(),
        prefix: config.aws.s3_prefix.clone(),
        endpoint: config.aws.endpoint.clone(),
        access_key_id: config.aws.access_key_id.clone(),
        secret_access_key: config.aws.secret_access_key.clone(),
        session_token: config.aws.session_token.clone(),
        storage_class: config.aws.storage_class.clone(),
        server_side_encryption: config.security.encryption_enabled,
        timeout: config.performance.timeout(),
    }
}

/// Maps configuration onto the engine options.
fn engine_options_from(performance: &PerformanceConfig, security: &SecurityConfig) -> EngineOptions {
    EngineOptions {
        max_concurrent_uploads: performance.max_concurrent_uploads,
        max_concurrent_downloads: performance.max_concurrent_downloads,
        retry_attempts: performance.retry_attempts,
        retry_delay: performance.retry_delay(),
        scheduled_interval: SCHEDULED_INTERVAL,
        max_file_size: security.max_file_size,
    }
}

/// Static exclusion set shared by the watcher and the engine.
fn base_filter_from(security: &SecurityConfig) -> PathFilter {
    PathFilter::new(&[])
        .with_denied_extensions(&security.denied_extensions)
        .with_allowed_extensions(&security.allowed_extensions)
}

// ============================================================================
// Components
// ============================================================================

/// One buildout of the service's moving parts. Rebuilt on reconfigure.
struct Components {
    sink: Arc<dyn MetricsSink>,
    prometheus: Option<Arc<PrometheusSink>>,
    watcher: FsWatcher,
    raw_events: Option<mpsc::Receiver<FileEvent>>,
    engine: Arc<SyncEngine>,
}

impl Components {
    /// Builds everything in dependency order; any failure is fatal.
    async fn build(config: &Config) -> Result<Self, SyncError> {
        // Metrics sink
        let (sink, prometheus): (Arc<dyn MetricsSink>, Option<Arc<PrometheusSink>>) =
            if config.metrics.enabled {
                let prom = Arc::new(
                    PrometheusSink::new()
                        .map_err(|e| SyncError::Config(format!("metrics registry: {e}")))?,
                );
                (Arc::clone(&prom) as Arc<dyn MetricsSink>, Some(prom))
            } else {
                (Arc::new(SimpleSink::new()), None)
            };
        info!(prometheus = prometheus.is_some(), "Metrics sink created");

        // Watcher
        let filter = base_filter_from(&config.security);
        let (watcher, raw_events) = FsWatcher::new(filter.clone(), Arc::clone(&sink))?;
        info!("File watcher created");

        // Object-store adapter; validates bucket reachability
        let store = S3ObjectStore::connect(s3_options_from(config)).await?;
        info!(
            bucket = %config.aws.s3_bucket,
            region = %config.aws.region,
            "Object store adapter created"
        );

        // Engine
        let engine = Arc::new(SyncEngine::new(
            Arc::new(store) as Arc<dyn ObjectStore>,
            Arc::clone(&sink),
            filter,
            engine_options_from(&config.performance, &config.security),
        ));
        for dir in &config.directories {
            engine.add_directory(dir.clone());
        }
        info!(directories = config.directories.len(), "Sync engine created");

        Ok(Self {
            sink,
            prometheus,
            watcher,
            raw_events: Some(raw_events),
            engine,
        })
    }
}

// ============================================================================
// Service
// ============================================================================

/// The running agent: owns all components and background task handles.
pub struct Service {
    config: Config,
    components: Components,
    /// Cancelled externally (signals) or by `stop()`
    parent: CancellationToken,
    /// Per-run child token observed by background tasks
    run_token: CancellationToken,
    background: Vec<JoinHandle<()>>,
    running: bool,
}

impl Service {
    /// Builds the service from validated configuration.
    ///
    /// `shutdown` is the externally owned token; cancelling it makes
    /// [`wait`](Service::wait) return so the caller can stop the service.
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self, SyncError> {
        let components = Components::build(&config).await?;
        let run_token = shutdown.child_token();

        Ok(Self {
            config,
            components,
            parent: shutdown,
            run_token,
            background: Vec::new(),
            running: false,
        })
    }

    /// Starts metrics exposure, the watch pipeline, the engine and the
    /// startup reconciliation.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.running {
            return Err(SyncError::InvalidState("service is already running".into()));
        }

        info!("Starting service");
        self.run_token = self.parent.child_token();

        // Metrics endpoint and system gauges
        if let Some(prometheus) = &self.components.prometheus {
            let server =
                MetricsServer::new(Arc::clone(prometheus), self.config.metrics.path.clone());
            let port = self.config.metrics.port;
            let token = self.run_token.clone();
            self.background.push(tokio::spawn(async move {
                if let Err(e) = server.serve(port, token).await {
                    error!(error = %e, "Metrics endpoint failed");
                }
            }));

            let collector = SystemCollector::new(
                Arc::clone(&self.components.sink),
                self.config.metrics.collect_interval(),
            );
            self.background.push(collector.spawn(self.run_token.clone()));
        }

        // Watch the realtime roots; a failing root is logged, not fatal
        for dir in self.components.engine.directories() {
            if dir.enabled && dir.sync_mode.is_realtime() {
                if let Err(e) = self.components.watcher.watch(&dir.local_path) {
                    error!(
                        root = %dir.local_path.display(),
                        error = %e,
                        "Failed to watch directory, continuing without realtime sync for it"
                    );
                }
            }
        }

        // Batcher between the watcher and the engine
        let raw_events = self
            .components
            .raw_events
            .take()
            .ok_or_else(|| SyncError::InvalidState("event stream already consumed".into()))?;
        let batcher = EventBatcher::new(DEFAULT_BATCH_WINDOW, Arc::clone(&self.components.sink));
        let (batched_events, batcher_handle) = batcher.spawn(raw_events);
        self.background.push(batcher_handle);

        // Engine
        self.components.engine.start(batched_events)?;

        // Startup reconciliation across all enabled directories
        let engine = Arc::clone(&self.components.engine);
        self.background.push(tokio::spawn(async move {
            startup_reconciliation(engine).await;
        }));

        self.running = true;
        info!("Service started");
        Ok(())
    }

    /// Stops everything and joins all background tasks. Idempotent.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        info!("Stopping service");
        self.run_token.cancel();

        self.components.engine.stop().await;
        self.components.watcher.stop();

        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task panicked during shutdown");
            }
        }

        self.running = false;
        info!("Service stopped");
    }

    /// Returns when shutdown has been requested (signal or `stop`).
    pub async fn wait(&self) {
        self.run_token.cancelled().await;
    }

    /// Whether the service is currently running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Engine statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        self.components.engine.stats()
    }

    /// Metrics snapshot from the sink.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.components.sink.snapshot()
    }

    /// Applies a new configuration: stop, rebuild, restart.
    ///
    /// When the new configuration fails to initialize, the previous one
    /// is rebuilt and restarted.
    pub async fn reconfigure(&mut self, new_config: Config) -> Result<(), SyncError> {
        let errors = new_config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::Config(joined));
        }

        info!("Applying new configuration");
        let was_running = self.running;
        self.stop().await;

        match Components::build(&new_config).await {
            Ok(components) => {
                self.components = components;
                self.config = new_config;
                if was_running {
                    self.start().await?;
                }
                info!("Configuration applied");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "New configuration failed to initialize, rolling back");
                self.components = Components::build(&self.config).await?;
                if was_running {
                    self.start().await?;
                }
                Err(e)
            }
        }
    }
}

/// One-shot reconciliation across all enabled directories, run
/// concurrently (one task per directory).
async fn startup_reconciliation(engine: Arc<SyncEngine>) {
    let dirs: Vec<_> = engine
        .directories()
        .into_iter()
        .filter(|d| d.enabled)
        .collect();

    if dirs.is_empty() {
        return;
    }

    info!(directories = dirs.len(), "Starting startup reconciliation");

    let mut handles = Vec::new();
    for dir in dirs {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            if let Err(e) = engine.sync_directory(&dir).await {
                if !matches!(e, SyncError::Cancelled) {
                    error!(
                        local_path = %dir.local_path.display(),
                        error = %e,
                        "Startup reconciliation failed for directory"
                    );
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    info!("Startup reconciliation completed");
}

// ============================================================================
// Unit tests
// ============================================================================
