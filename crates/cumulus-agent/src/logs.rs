//! Rotated log-file retention
//!
//! The appender rotates by time only, so the size, age, backup-count and
//! compression knobs are enforced here instead: a periodic pass over the
//! log directory gzips rotated files, drops files past `max_age_days`,
//! and trims the remainder to `max_backups` files and `max_size_mb`
//! total. The active log file is never touched.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cumulus_core::config::LoggingConfig;

/// How often the retention pass runs.
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Suffix of already-compressed rotated files.
const GZ_SUFFIX: &str = ".gz";

/// Spawns the hourly retention task for file-based logging.
///
/// Returns `None` when logging goes to stdout, where there is nothing to
/// retain. One pass runs immediately so stale files from previous runs
/// are cleaned without waiting an hour.
pub fn spawn_retention(
    config: LoggingConfig,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if config.output_path.is_empty() {
        return None;
    }

    Some(tokio::spawn(async move {
        let output_path = PathBuf::from(&config.output_path);
        info!(
            log_file = %output_path.display(),
            max_backups = config.max_backups,
            max_age_days = config.max_age_days,
            max_size_mb = config.max_size_mb,
            compress = config.compress,
            "Log retention started"
        );

        loop {
            match apply_retention(&output_path, &config) {
                Ok(removed) if removed > 0 => {
                    debug!(removed, "Log retention pass removed rotated files");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Log retention pass failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RETENTION_INTERVAL) => {}
            }
        }

        info!("Log retention stopped");
    }))
}

/// One rotated log file with the metadata retention decisions need.
struct RotatedFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Applies compression and the retention limits to the log directory.
///
/// Returns the number of rotated files deleted.
pub fn apply_retention(output_path: &Path, policy: &LoggingConfig) -> io::Result<usize> {
    let directory = output_path.parent().unwrap_or_else(|| Path::new("."));
    let Some(active_name) = output_path.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };

    let mut rotated = collect_rotated(directory, active_name)?;

    if policy.compress {
        for file in &mut rotated {
            if let Err(e) = compress_in_place(file) {
                warn!(path = %file.path.display(), error = %e, "Could not compress rotated log");
            }
        }
    }

    // Newest first; pruning always removes from the old end.
    rotated.sort_by(|a, b| b.modified.cmp(&a.modified));

    let mut removed = 0usize;

    // Age limit
    if policy.max_age_days > 0 {
        let cutoff = SystemTime::now() - Duration::from_secs(u64::from(policy.max_age_days) * 86_400);
        rotated.retain(|file| {
            if file.modified < cutoff {
                removed += delete_rotated(&file.path);
                false
            } else {
                true
            }
        });
    }

    // Count limit
    while rotated.len() > policy.max_backups as usize {
        if let Some(file) = rotated.pop() {
            removed += delete_rotated(&file.path);
        }
    }

    // Total-size budget
    let budget = policy.max_size_mb * 1024 * 1024;
    let mut total: u64 = rotated.iter().map(|f| f.size).sum();
    while total > budget {
        let Some(file) = rotated.pop() else { break };
        total = total.saturating_sub(file.size);
        removed += delete_rotated(&file.path);
    }

    Ok(removed)
}

/// Enumerates rotated siblings of the active log file.
///
/// The appender names them `<active>.<timestamp>`; compressed ones carry
/// an extra `.gz`. The active file itself is excluded.
fn collect_rotated(directory: &Path, active_name: &str) -> io::Result<Vec<RotatedFile>> {
    let prefix = format!("{active_name}.");
    let mut rotated = Vec::new();

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == active_name || !name.starts_with(&prefix) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        rotated.push(RotatedFile {
            path: entry.path(),
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    Ok(rotated)
}

/// Gzips one rotated file, replacing it and preserving its mtime for the
/// age-based pruning above.
fn compress_in_place(file: &mut RotatedFile) -> io::Result<()> {
    if file.path.extension().is_some_and(|e| e == "gz") {
        return Ok(());
    }

    let data = fs::read(&file.path)?;
    let mut target = file.path.as_os_str().to_os_string();
    target.push(GZ_SUFFIX);
    let target = PathBuf::from(target);

    let mut encoder = GzEncoder::new(fs::File::create(&target)?, flate2::Compression::default());
    encoder.write_all(&data)?;
    encoder.finish()?;

    let compressed_size = fs::metadata(&target)?.len();
    filetime::set_file_mtime(&target, filetime::FileTime::from_system_time(file.modified))?;
    fs::remove_file(&file.path)?;

    debug!(
        path = %target.display(),
        original = file.size,
        compressed = compressed_size,
        "Compressed rotated log"
    );

    file.path = target;
    file.size = compressed_size;
    Ok(())
}

fn delete_rotated(path: &Path) -> usize {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted rotated log");
            1
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not delete rotated log");
            0
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
