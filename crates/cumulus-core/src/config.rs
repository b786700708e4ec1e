//! Configuration module for Cumulus.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, defaults and sample generation for the
//! `--generate-config` flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{SyncDirectory, SyncError, SyncMode};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for the Cumulus agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aws: AwsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub security: SecurityConfig,
    pub performance: PerformanceConfig,
    pub directories: Vec<SyncDirectory>,
}

/// Object-store connection settings.
///
/// Credentials left empty defer to the SDK's environment/instance-role
/// chain (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Object-store region
    pub region: String,
    /// Bucket name (required)
    pub s3_bucket: String,
    /// Global key prefix under which all directories are mirrored
    pub s3_prefix: String,
    /// Static access key; empty defers to the environment
    pub access_key_id: String,
    /// Static secret key; empty defers to the environment
    pub secret_access_key: String,
    /// Session token for temporary credentials
    pub session_token: String,
    /// Override base URL for S3-compatible services
    pub endpoint: String,
    /// Storage class applied to uploads; empty uses the bucket default
    pub storage_class: String,
}

/// Logging pipeline settings.
///
/// Rotation is time-based (`rotation`); the remaining knobs bound what
/// the retention pass keeps on disk: rotated files are compressed when
/// `compress` is set, dropped after `max_age_days`, and capped at
/// `max_backups` files / `max_size_mb` total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// Output format: `json` or `text`
    pub format: String,
    /// Log file path; empty logs to stdout
    pub output_path: String,
    /// File rotation: `daily`, `hourly` or `never`
    pub rotation: String,
    /// Total size budget for rotated files, in MiB
    pub max_size_mb: u64,
    /// Rotated files older than this are deleted
    pub max_age_days: u32,
    /// Maximum number of rotated files to keep
    pub max_backups: u32,
    /// Gzip rotated files
    pub compress: bool,
}

/// Metrics exposure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint and system collector run
    pub enabled: bool,
    /// Listen port for the exposition endpoint
    pub port: u16,
    /// HTTP path serving the exposition format
    pub path: String,
    /// Seconds between system gauge samples
    pub collect_interval: u64,
}

/// Upload gating settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Request server-side encryption on uploads
    pub encryption_enabled: bool,
    /// Files larger than this (bytes) are skipped with a log
    pub max_file_size: u64,
    /// When non-empty, only these extensions are uploaded
    pub allowed_extensions: Vec<String>,
    /// Extensions excluded from sync in addition to the built-in filters
    pub denied_extensions: Vec<String>,
}

/// Runtime tuning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upload worker count
    pub max_concurrent_uploads: usize,
    /// Download worker count
    pub max_concurrent_downloads: usize,
    /// Upload chunk size in bytes
    pub upload_chunk_size: u64,
    /// Download chunk size in bytes
    pub download_chunk_size: u64,
    /// Additional attempts after the first failure of a task
    pub retry_attempts: u32,
    /// Seconds between retry attempts
    pub retry_delay: u64,
    /// Seconds before an object-store operation times out
    pub timeout_duration: u64,
    /// Bytes per second; 0 means unlimited
    pub bandwidth_limit: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            s3_bucket: String::new(),
            s3_prefix: "cumulus/".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            endpoint: String::new(),
            storage_class: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output_path: String::new(),
            rotation: "daily".to_string(),
            max_size_mb: 100,
            max_age_days: 30,
            max_backups: 10,
            compress: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
            collect_interval: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            max_file_size: 100 * 1024 * 1024,
            allowed_extensions: Vec::new(),
            denied_extensions: vec![".tmp".to_string(), ".lock".to_string()],
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 5,
            max_concurrent_downloads: 5,
            upload_chunk_size: 5 * 1024 * 1024,
            download_chunk_size: 5 * 1024 * 1024,
            retry_attempts: 3,
            retry_delay: 5,
            timeout_duration: 30,
            bandwidth_limit: 0,
        }
    }
}

impl PerformanceConfig {
    /// Delay between retry attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Operation timeout for object-store calls.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_duration)
    }
}

impl MetricsConfig {
    /// Interval between system gauge samples.
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }
}

// ---------------------------------------------------------------------------
// Loading and saving
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    ///
    /// A missing file yields the defaults; a present but invalid file is an
    /// error. The result is always validated.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
            serde_yaml::from_str::<Config>(&content)
                .map_err(|e| SyncError::Config(format!("cannot parse {}: {e}", path.display())))?
        } else {
            Config::default()
        };

        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(SyncError::Config(joined))
        }
    }

    /// Save the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Config(format!("cannot create {}: {e}", parent.display())))?;
        }
        let data = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, data)
            .map_err(|e| SyncError::Config(format!("cannot write {}: {e}", path.display())))
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cumulus/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("cumulus")
            .join("config.yaml")
    }

    /// Starter configuration for `--generate-config`: defaults plus two
    /// example directories the user is expected to edit.
    pub fn sample() -> Self {
        let mut config = Config::default();
        config.directories = vec![
            SyncDirectory {
                local_path: PathBuf::from("/home/user/Documents"),
                remote_path: "documents".to_string(),
                sync_mode: SyncMode::Realtime,
                schedule: String::new(),
                recursive: true,
                filters: vec!["*.tmp".to_string(), "*.lock".to_string(), ".DS_Store".to_string()],
                enabled: true,
            },
            SyncDirectory {
                local_path: PathBuf::from("/home/user/Pictures"),
                remote_path: "pictures".to_string(),
                sync_mode: SyncMode::Scheduled,
                schedule: "0 2 * * *".to_string(),
                recursive: true,
                filters: vec!["*.tmp".to_string(), "Thumbs.db".to_string()],
                enabled: false,
            },
        ];
        config
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"performance.retry_delay"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["json", "text"];

/// Valid values for `logging.rotation`.
const VALID_LOG_ROTATIONS: &[&str] = &["daily", "hourly", "never"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- aws ---
        if self.aws.s3_bucket.is_empty() {
            errors.push(ValidationError {
                field: "aws.s3_bucket".into(),
                message: "bucket name is required".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }
        if !VALID_LOG_ROTATIONS.contains(&self.logging.rotation.as_str()) {
            errors.push(ValidationError {
                field: "logging.rotation".into(),
                message: format!(
                    "invalid rotation '{}'; valid options: {}",
                    self.logging.rotation,
                    VALID_LOG_ROTATIONS.join(", ")
                ),
            });
        }
        if self.logging.max_size_mb == 0 {
            errors.push(ValidationError {
                field: "logging.max_size_mb".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.logging.max_backups == 0 {
            errors.push(ValidationError {
                field: "logging.max_backups".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- metrics ---
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                errors.push(ValidationError {
                    field: "metrics.port".into(),
                    message: "must be greater than 0".into(),
                });
            }
            if !self.metrics.path.starts_with('/') {
                errors.push(ValidationError {
                    field: "metrics.path".into(),
                    message: "must start with '/'".into(),
                });
            }
            if self.metrics.collect_interval == 0 {
                errors.push(ValidationError {
                    field: "metrics.collect_interval".into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        // --- security ---
        if self.security.max_file_size == 0 {
            errors.push(ValidationError {
                field: "security.max_file_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- performance ---
        if self.performance.max_concurrent_uploads == 0 {
            errors.push(ValidationError {
                field: "performance.max_concurrent_uploads".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.performance.max_concurrent_downloads == 0 {
            errors.push(ValidationError {
                field: "performance.max_concurrent_downloads".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.performance.upload_chunk_size == 0 {
            errors.push(ValidationError {
                field: "performance.upload_chunk_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.performance.download_chunk_size == 0 {
            errors.push(ValidationError {
                field: "performance.download_chunk_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- directories ---
        for (i, dir) in self.directories.iter().enumerate() {
            if dir.local_path.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: format!("directories[{i}].local_path"),
                    message: "local path is required".into(),
                });
            } else if !dir.local_path.is_absolute() {
                errors.push(ValidationError {
                    field: format!("directories[{i}].local_path"),
                    message: "local path must be absolute".into(),
                });
            }

            if dir.sync_mode.is_scheduled() && dir.schedule.is_empty() {
                errors.push(ValidationError {
                    field: format!("directories[{i}].schedule"),
                    message: "schedule is required for scheduled sync mode".into(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
