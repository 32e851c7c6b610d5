//! Scan configuration.

use std::collections::HashSet;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Options accepted by both the local and the remote walker.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
pub struct ScanOptions {
    /// Include entries whose base name starts with `.`.
    #[serde(default = "default_true")]
    pub show_hidden: bool,

    /// Resolve symbolic links: recurse symlinked directories outside the
    /// tree and dedup file-target aliases.
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Base names to drop wherever they appear.
    #[serde(default)]
    pub exclude_names: Vec<String>,

    /// Upper bound on parallel directory scans; 0 selects 3x logical CPUs.
    #[serde(default)]
    pub concurrency: usize,

    /// Advisory hint to reduce runtime memory reclamation during the scan.
    /// Accepted for option compatibility; currently a no-op.
    #[serde(default)]
    pub disable_aggressive_gc: bool,

    /// Deadline on the whole scan. Only honored by the remote walker;
    /// expiry is reported as cancellation.
    #[builder(setter(strip_option))]
    #[serde(default)]
    pub scan_timeout: Option<Duration>,
}

fn default_true() -> bool {
    true
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            show_hidden: true,
            follow_symlinks: false,
            exclude_names: Vec::new(),
            concurrency: 0,
            disable_aggressive_gc: false,
            scan_timeout: None,
        }
    }
}

impl ScanOptions {
    pub fn builder() -> ScanOptionsBuilder {
        ScanOptionsBuilder::default()
    }

    /// Resolved semaphore capacity: the configured bound, or 3x the logical
    /// CPU count when unset, never less than one.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * 3).max(1)
    }

    /// Exclusion set for fast lookup during the walk.
    pub fn exclude_set(&self) -> HashSet<String> {
        self.exclude_names.iter().cloned().collect()
    }

    /// Whether an entry name is dropped by the hidden-file policy.
    pub fn skips_hidden(&self, name: &str) -> bool {
        !self.show_hidden && name.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ScanOptions::default();
        assert!(opts.show_hidden);
        assert!(!opts.follow_symlinks);
        assert_eq!(opts.concurrency, 0);
        assert!(opts.scan_timeout.is_none());
        assert!(opts.effective_concurrency() >= 1);
    }

    #[test]
    fn test_builder() {
        let opts = ScanOptions::builder()
            .show_hidden(false)
            .follow_symlinks(true)
            .exclude_names(vec!["node_modules".to_string()])
            .concurrency(8usize)
            .build()
            .unwrap();

        assert!(!opts.show_hidden);
        assert!(opts.follow_symlinks);
        assert_eq!(opts.effective_concurrency(), 8);
        assert!(opts.exclude_set().contains("node_modules"));
    }

    #[test]
    fn test_skips_hidden() {
        let mut opts = ScanOptions::default();
        assert!(!opts.skips_hidden(".git"));
        opts.show_hidden = false;
        assert!(opts.skips_hidden(".git"));
        assert!(!opts.skips_hidden("src"));
    }
}
