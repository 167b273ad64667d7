use std::fmt;
use std::sync::Arc;

use super::metrics::{default_counts_metrics, CountsMetrics};

/// Default cap on in-memory totals before a flush is forced.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1_000_000;

/// Every this many transaction ids, `apply` checks whether the change map needs flushing.
pub const CACHE_CHECK_INTERVAL: u64 = 10;

/// Configuration supplied when opening a counts or degrees store.
#[derive(Clone)]
pub struct CountsStoreOptions {
    /// Open without ever writing: no file creation, no rebuild, checkpoints are no-ops.
    pub read_only: bool,
    /// Upper bound on in-memory totals; flushing starts at 80% of it.
    pub max_cache_size: usize,
    /// Name used in log events.
    pub name: String,
    /// Metrics sink.
    pub metrics: Arc<dyn CountsMetrics>,
}

impl CountsStoreOptions {
    /// Options for a writable store named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            read_only: false,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            name: name.into(),
            metrics: default_counts_metrics(),
        }
    }

    /// Opens the store read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the in-memory cap. Zero is raised to one.
    pub fn max_cache_size(mut self, entries: usize) -> Self {
        self.max_cache_size = entries.max(1);
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn CountsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Map size above which `apply` tries to flush.
    pub fn high_mark_cache_size(&self) -> usize {
        (self.max_cache_size as f64 * 0.8) as usize
    }
}

impl Default for CountsStoreOptions {
    fn default() -> Self {
        Self::new("counts")
    }
}

impl fmt::Debug for CountsStoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountsStoreOptions")
            .field("read_only", &self.read_only)
            .field("max_cache_size", &self.max_cache_size)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
