use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::TxId;

/// Observes counts store activity.
///
/// Implementations must be cheap; hooks run on the apply and checkpoint paths.
pub trait CountsMetrics: Send + Sync {
    /// An `apply` returned no updater because the transaction was already applied or the
    /// store is waiting for its rebuild.
    fn ignored_transaction(&self, tx: TxId);

    /// An `apply` handed out an updater.
    fn applied_transaction(&self, tx: TxId);

    /// Changes were written to the tree because the in-memory map grew too large.
    fn cache_flushed(&self, changes_written: usize);

    /// A checkpoint completed after writing `changes_written` totals.
    fn checkpoint_completed(&self, changes_written: usize);

    /// A rebuild from the primary store completed.
    fn rebuild_completed(&self, last_committed: TxId);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopCountsMetrics;

impl CountsMetrics for NoopCountsMetrics {
    fn ignored_transaction(&self, _tx: TxId) {}
    fn applied_transaction(&self, _tx: TxId) {}
    fn cache_flushed(&self, _changes_written: usize) {}
    fn checkpoint_completed(&self, _changes_written: usize) {}
    fn rebuild_completed(&self, _last_committed: TxId) {}
}

/// Atomic counters, safe to read from any thread.
#[derive(Default)]
pub struct CounterCountsMetrics {
    /// Transactions turned into no-op updaters.
    pub ignored_transactions: AtomicU64,
    /// Updaters handed out.
    pub applied_transactions: AtomicU64,
    /// Size-triggered flushes.
    pub cache_flushes: AtomicU64,
    /// Completed checkpoints.
    pub checkpoints: AtomicU64,
    /// Totals written by flushes and checkpoints.
    pub changes_written: AtomicU64,
    /// Completed rebuilds.
    pub rebuilds: AtomicU64,
    /// Last transaction id reported as ignored.
    pub last_ignored_tx: AtomicU64,
}

impl CountsMetrics for CounterCountsMetrics {
    fn ignored_transaction(&self, tx: TxId) {
        self.ignored_transactions.fetch_add(1, Ordering::Relaxed);
        self.last_ignored_tx.store(tx.0, Ordering::Relaxed);
    }

    fn applied_transaction(&self, _tx: TxId) {
        self.applied_transactions.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_flushed(&self, changes_written: usize) {
        self.cache_flushes.fetch_add(1, Ordering::Relaxed);
        self.changes_written
            .fetch_add(changes_written as u64, Ordering::Relaxed);
    }

    fn checkpoint_completed(&self, changes_written: usize) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        self.changes_written
            .fetch_add(changes_written as u64, Ordering::Relaxed);
    }

    fn rebuild_completed(&self, _last_committed: TxId) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }
}

/// Default metrics sink, a [`NoopCountsMetrics`].
pub fn default_counts_metrics() -> Arc<dyn CountsMetrics> {
    Arc::new(NoopCountsMetrics)
}
