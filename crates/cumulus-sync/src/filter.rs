//! Path exclusion rules
//!
//! One [`PathFilter`] instance combines the built-in exclusions (hidden
//! names, editor/temp suffixes) with configured glob patterns and the
//! security extension gates. The watcher applies a static filter built
//! from the security section; the engine applies a per-directory filter
//! that additionally carries the directory's own patterns.

use std::path::Path;

use glob::Pattern;
use tracing::warn;

/// Editor and temp-file suffixes that are never synced.
const TEMP_SUFFIXES: &[&str] = &[".tmp", ".swp", "~"];

/// Decides which paths are excluded from synchronization.
///
/// Matching is done against the basename only, mirroring how users write
/// patterns like `*.tmp` or `Thumbs.db`.
#[derive(Debug, Default, Clone)]
pub struct PathFilter {
    patterns: Vec<Pattern>,
    denied_extensions: Vec<String>,
    allowed_extensions: Vec<String>,
}

impl PathFilter {
    /// Builds a filter from glob pattern strings.
    ///
    /// Invalid patterns are logged and skipped so one bad entry does not
    /// disable the rest of the filter set.
    pub fn new(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Skipping invalid filter pattern");
                    None
                }
            })
            .collect();

        Self {
            patterns: compiled,
            denied_extensions: Vec::new(),
            allowed_extensions: Vec::new(),
        }
    }

    /// Adds extensions (with leading dot, e.g. `".bak"`) that are excluded.
    pub fn with_denied_extensions(mut self, extensions: &[String]) -> Self {
        self.denied_extensions = extensions.to_vec();
        self
    }

    /// Restricts sync to the given extensions when the list is non-empty.
    pub fn with_allowed_extensions(mut self, extensions: &[String]) -> Self {
        self.allowed_extensions = extensions.to_vec();
        self
    }

    /// Returns a filter combining these rules with additional patterns.
    ///
    /// Used to derive a per-directory filter from the static one.
    pub fn with_patterns(&self, patterns: &[String]) -> Self {
        let mut combined = self.clone();
        combined.patterns.extend(PathFilter::new(patterns).patterns);
        combined
    }

    /// Returns true when `path` must be excluded from synchronization.
    pub fn excludes(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        // Hidden files and directories
        if name.starts_with('.') {
            return true;
        }

        // Editor and temp files
        if TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return true;
        }

        if self
            .denied_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
        {
            return true;
        }

        if !self.allowed_extensions.is_empty() {
            let allowed = self
                .allowed_extensions
                .iter()
                .any(|ext| name.ends_with(ext.as_str()));
            if !allowed {
                return true;
            }
        }

        self.patterns.iter().any(|p| p.matches(name))
    }
}
