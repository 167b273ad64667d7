use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::primitives::tree::{IoLimiter, OrderedTree, TreeCheckReport, TreeOptions};
use crate::types::{Result, SombraError, TxId};

use super::changes::CountsChanges;
use super::header::{CountsHeader, CountsHeaderReader};
use super::key::{CountsKey, TYPE_STRAY_TX_ID};
use super::layout::CountsLayout;
use super::metrics::CountsMetrics;
use super::options::{CountsStoreOptions, CACHE_CHECK_INTERVAL};
use super::txid::{OutOfOrderSequence, TxIdInformation};
use super::writer::{
    read_count_from_tree, CountUpdater, CountWriter, MapWriter, TreeWriter, UpdaterLock,
    WriteMode,
};

/// Lifecycle of a [`GenericCountsStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreState {
    /// Not open.
    Closed,
    /// Open in progress.
    Opening,
    /// Opened without usable persisted counts; `start` will rebuild them.
    RebuildNeeded,
    /// Opened with persisted counts.
    Ready,
    /// Accepting transactions.
    Started,
}

impl StoreState {
    fn as_u8(self) -> u8 {
        match self {
            StoreState::Closed => 0,
            StoreState::Opening => 1,
            StoreState::RebuildNeeded => 2,
            StoreState::Ready => 3,
            StoreState::Started => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => StoreState::Opening,
            2 => StoreState::RebuildNeeded,
            3 => StoreState::Ready,
            4 => StoreState::Started,
            _ => StoreState::Closed,
        }
    }
}

/// Recomputes counts from the primary store when no persisted counts exist.
pub trait Rebuilder: Send + Sync {
    /// Id of the last transaction reflected by the primary store.
    fn last_committed_tx_id(&self) -> TxId;

    /// Emits every count into `updater` as deltas. Each attempt starts from an empty tree,
    /// so a failed rebuild can simply be retried.
    fn rebuild(&self, updater: &mut CountUpdater<'_>) -> Result<()>;
}

/// Rebuilder for stores with nothing to scan.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmptyRebuild;

impl Rebuilder for EmptyRebuild {
    fn last_committed_tx_id(&self) -> TxId {
        TxId::BASE
    }

    fn rebuild(&self, _updater: &mut CountUpdater<'_>) -> Result<()> {
        Ok(())
    }
}

/// Rebuilder producing an empty store whose first transaction is [`TxId::BASE`] + 1.
pub const EMPTY_REBUILD: EmptyRebuild = EmptyRebuild;

/// Receives counts during [`GenericCountsStore::visit_all_counts`].
pub trait CountVisitor {
    /// Called once per key with a non-zero count.
    fn visit(&mut self, key: CountsKey, count: i64) -> Result<()>;
}

impl<F> CountVisitor for F
where
    F: FnMut(CountsKey, i64) -> Result<()>,
{
    fn visit(&mut self, key: CountsKey, count: i64) -> Result<()> {
        self(key, count)
    }
}

/// Outcome of [`GenericCountsStore::consistency_check`].
#[derive(Clone, Debug, Default)]
pub struct ConsistencyReport {
    /// Structural findings of the tree.
    pub tree: TreeCheckReport,
    /// Persisted counts examined.
    pub counts_checked: u64,
    /// Keys whose persisted value breaks the value rules.
    pub invalid_entries: Vec<String>,
}

impl ConsistencyReport {
    /// Whether nothing was found.
    pub fn is_consistent(&self) -> bool {
        self.tree.is_consistent() && self.invalid_entries.is_empty()
    }
}

/// Transactional counts store over an [`OrderedTree`].
///
/// Transactions add deltas through [`GenericCountsStore::apply`] into an in-memory change
/// map under a shared lock. [`GenericCountsStore::checkpoint`] takes the exclusive lock
/// only to fork that map and snapshot the applied transaction ids, then writes the frozen
/// totals and checkpoints the tree while new transactions keep applying.
pub struct GenericCountsStore {
    tree: OrderedTree<CountsLayout>,
    name: String,
    read_only: bool,
    max_cache_size: usize,
    high_mark_cache_size: usize,
    lock: RwLock<()>,
    section: Mutex<()>,
    start_lock: Mutex<()>,
    changes: RwLock<Arc<CountsChanges>>,
    tx_id_info: RwLock<TxIdInformation>,
    id_sequence: OutOfOrderSequence,
    state: AtomicU8,
    failure: Mutex<Option<String>>,
    rebuilder: Box<dyn Rebuilder>,
    metrics: Arc<dyn CountsMetrics>,
}

impl GenericCountsStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// A file that fails verification is deleted and recreated, leaving the store in
    /// [`StoreState::RebuildNeeded`].
    pub fn open(
        path: impl AsRef<Path>,
        rebuilder: Box<dyn Rebuilder>,
        opts: &CountsStoreOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let tree_opts = TreeOptions {
            read_only: opts.read_only,
        };
        let mut header = CountsHeaderReader::default();
        let tree = match OrderedTree::open(path, CountsLayout, &tree_opts, &mut header) {
            Ok(tree) => tree,
            Err(SombraError::MetadataMismatch { reason, .. }) if !opts.read_only => {
                warn!(
                    store = %opts.name,
                    path = %path.display(),
                    reason,
                    "counts.open.recreated"
                );
                fs::remove_file(path)?;
                header = CountsHeaderReader::default();
                OrderedTree::open(path, CountsLayout, &tree_opts, &mut header)?
            }
            Err(err) => return Err(err),
        };
        // Entries without a usable header cannot be trusted as a rebuild base.
        let tree = if header.needs_rebuild() && !tree.is_empty() && !opts.read_only {
            warn!(
                store = %opts.name,
                path = %path.display(),
                entries = tree.len(),
                "counts.open.discarded"
            );
            tree.close()?;
            fs::remove_file(path)?;
            header = CountsHeaderReader::default();
            OrderedTree::open(path, CountsLayout, &tree_opts, &mut header)?
        } else {
            tree
        };

        let strays = stray_tx_ids_in_tree(&tree)?;
        let info = TxIdInformation::new(header.highest_gap_free_tx_id(), strays);
        let state = if header.needs_rebuild() {
            StoreState::RebuildNeeded
        } else {
            StoreState::Ready
        };
        info!(
            store = %opts.name,
            path = %path.display(),
            highest_gap_free = info.highest_gap_free().0,
            strays = info.stray_count(),
            state = ?state,
            "counts.open"
        );
        Ok(Self {
            tree,
            name: opts.name.clone(),
            read_only: opts.read_only,
            max_cache_size: opts.max_cache_size,
            high_mark_cache_size: opts.high_mark_cache_size(),
            lock: RwLock::new(()),
            section: Mutex::new(()),
            start_lock: Mutex::new(()),
            changes: RwLock::new(Arc::new(CountsChanges::new())),
            id_sequence: OutOfOrderSequence::new(info.clone()),
            tx_id_info: RwLock::new(info),
            state: AtomicU8::new(state.as_u8()),
            failure: Mutex::new(None),
            rebuilder,
            metrics: Arc::clone(&opts.metrics),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the store was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Name used in log events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    /// Transaction ids known to be persisted as of the last checkpoint (or open/rebuild).
    pub fn tx_id_information(&self) -> TxIdInformation {
        self.tx_id_info.read().clone()
    }

    /// Whether a failed checkpoint or flush left the store refusing writes.
    pub fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Number of totals held in the live change map.
    pub fn pending_changes(&self) -> usize {
        self.changes.read().len()
    }

    /// Rebuilds counts if needed and starts accepting transactions.
    ///
    /// Fails with [`SombraError::ReadOnly`] when a rebuild is needed on a read-only store.
    pub fn start(&self) -> Result<()> {
        let _start = self.start_lock.lock();
        match self.state() {
            StoreState::Started => Ok(()),
            StoreState::Ready => {
                self.set_state(StoreState::Started);
                Ok(())
            }
            StoreState::RebuildNeeded => {
                if self.read_only {
                    return Err(SombraError::ReadOnly(
                        "counts store needs rebuilding but is read-only",
                    ));
                }
                self.rebuild()?;
                self.set_state(StoreState::Started);
                Ok(())
            }
            StoreState::Closed | StoreState::Opening => {
                Err(SombraError::Invalid("counts store is not open"))
            }
        }
    }

    fn rebuild(&self) -> Result<()> {
        let started = Instant::now();
        let last_committed = self.rebuilder.last_committed_tx_id();
        info!(store = %self.name, last_committed = last_committed.0, "counts.rebuild.start");
        {
            let exclusive = self.lock.write();
            let mut writer = self.tree.writer()?;
            // A failed earlier attempt may have left partial increments behind.
            let dropped = writer.clear();
            if dropped > 0 {
                warn!(store = %self.name, entries = dropped, "counts.rebuild.cleared");
            }
            let writer = TreeWriter::new(writer, WriteMode::Delta);
            let mut updater =
                CountUpdater::new(CountWriter::Tree(writer), UpdaterLock::Exclusive(exclusive));
            self.rebuilder.rebuild(&mut updater)?;
            updater.close()?;
        }
        self.id_sequence.set(last_committed);
        *self.tx_id_info.write() = TxIdInformation::new(last_committed, []);
        self.metrics.rebuild_completed(last_committed);
        info!(
            store = %self.name,
            last_committed = last_committed.0,
            entries = self.tree.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "counts.rebuild.complete"
        );
        Ok(())
    }

    /// Opens an updater for transaction `tx_id`.
    ///
    /// Returns `None` when the transaction was already applied, is held by another open
    /// updater, or when the store still waits for its rebuild, in which case the rebuild
    /// will account for it. Fails with [`SombraError::Failed`] after a failed checkpoint.
    pub fn apply(&self, tx_id: TxId) -> Result<Option<CountUpdater<'_>>> {
        self.ensure_not_failed()?;
        if tx_id.0 % CACHE_CHECK_INTERVAL == 0 {
            self.check_cache_size_and_maybe_flush()?;
        }
        let shared = self.lock.read();
        let awaiting_rebuild = self.state() == StoreState::RebuildNeeded;
        // Reserving the id also turns away a second updater for a transaction still open.
        let already_applied = !awaiting_rebuild
            && (self.tx_id_info.read().is_applied(tx_id) || !self.id_sequence.reserve(tx_id));
        if already_applied || awaiting_rebuild {
            drop(shared);
            debug!(
                store = %self.name,
                tx = tx_id.0,
                already_applied,
                awaiting_rebuild,
                "counts.apply.ignored"
            );
            self.metrics.ignored_transaction(tx_id);
            return Ok(None);
        }
        let changes = Arc::clone(&*self.changes.read());
        self.metrics.applied_transaction(tx_id);
        let writer = MapWriter::new(changes, &self.tree, &self.id_sequence, tx_id);
        Ok(Some(CountUpdater::new(
            CountWriter::Map(writer),
            UpdaterLock::Shared(shared),
        )))
    }

    /// Opens an updater writing straight into the tree, bypassing transaction tracking.
    ///
    /// With `apply_deltas` values are added to the stored counts, otherwise they replace
    /// them. Holds the exclusive lock until closed.
    pub fn direct_updater(&self, apply_deltas: bool) -> Result<CountUpdater<'_>> {
        if self.read_only {
            return Err(SombraError::ReadOnly("direct updates need a writable store"));
        }
        self.ensure_not_failed()?;
        let exclusive = self.lock.write();
        let mode = if apply_deltas {
            WriteMode::Delta
        } else {
            WriteMode::Absolute
        };
        let writer = TreeWriter::new(self.tree.writer()?, mode);
        Ok(CountUpdater::new(
            CountWriter::Tree(writer),
            UpdaterLock::Exclusive(exclusive),
        ))
    }

    /// Makes every delta of transactions closed before this call durable.
    ///
    /// No-op on a read-only store.
    pub fn checkpoint(&self, limiter: &dyn IoLimiter) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let started = Instant::now();
        let _section = self.section.lock();
        self.ensure_not_failed()?;
        let exclusive = self.lock.write();
        let (written, snapshot) = self.write_changes_to_tree(exclusive, true)?;
        let highest_gap_free = snapshot
            .map(|s| s.highest_gap_free())
            .unwrap_or_else(|| self.tx_id_info.read().highest_gap_free());
        let header = CountsHeader {
            highest_gap_free_tx_id: highest_gap_free,
        };
        self.tree.checkpoint(&header.encode(), limiter)?;
        self.metrics.checkpoint_completed(written);
        info!(
            store = %self.name,
            highest_gap_free = highest_gap_free.0,
            changes = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "counts.checkpoint.complete"
        );
        Ok(())
    }

    fn check_cache_size_and_maybe_flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let cache_size = self.changes.read().len();
        if cache_size <= self.high_mark_cache_size {
            return Ok(());
        }
        // Another thread is already switching maps.
        let Some(_section) = self.section.try_lock() else {
            return Ok(());
        };
        let exclusive = match self.lock.try_write() {
            Some(guard) => guard,
            None if cache_size > self.max_cache_size => self.lock.write(),
            None => return Ok(()),
        };
        // A checkpoint may have emptied the map or failed meanwhile.
        if self.is_failed() || self.changes.read().len() <= self.high_mark_cache_size {
            return Ok(());
        }
        let (written, _) = self.write_changes_to_tree(exclusive, false)?;
        self.metrics.cache_flushed(written);
        debug!(store = %self.name, changes = written, "counts.cache.flushed");
        Ok(())
    }

    /// Swaps in a fresh change map under the exclusive lock, then writes the frozen one
    /// while holding the lock shared.
    ///
    /// A failed write leaves the tree partly updated, so the store is marked failed and
    /// refuses every later write; reopening restores the last checkpoint for replay.
    fn write_changes_to_tree(
        &self,
        exclusive: RwLockWriteGuard<'_, ()>,
        with_snapshot: bool,
    ) -> Result<(usize, Option<TxIdInformation>)> {
        let (to_write, snapshot) = {
            let snapshot = with_snapshot.then(|| self.id_sequence.snapshot());
            let mut current = self.changes.write();
            let to_write = Arc::clone(&*current);
            *current = to_write.freeze_and_fork();
            (to_write, snapshot)
        };
        let _shared = RwLockWriteGuard::downgrade(exclusive);
        let written = match self.write_counts_changes(&to_write, snapshot.as_ref()) {
            Ok(written) => written,
            Err(err) => {
                warn!(store = %self.name, error = %err, "counts.write.failed");
                *self.failure.lock() = Some(err.to_string());
                return Err(err);
            }
        };
        if let Some(snapshot) = snapshot.as_ref() {
            *self.tx_id_info.write() = snapshot.clone();
        }
        self.changes.read().clear_previous_changes();
        Ok((written, snapshot))
    }

    fn ensure_not_failed(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(SombraError::Failed(reason.clone())),
            None => Ok(()),
        }
    }

    fn write_counts_changes(
        &self,
        changes: &CountsChanges,
        snapshot: Option<&TxIdInformation>,
    ) -> Result<usize> {
        let mut writer = self.tree.writer()?;
        if let Some(snapshot) = snapshot {
            for tx in stray_tx_ids_in_tree(&self.tree)? {
                writer.remove(&CountsKey::stray_tx_id(tx))?;
            }
            for tx in snapshot.stray_tx_ids() {
                writer.put(&CountsKey::stray_tx_id(tx), &0)?;
            }
        }
        let mut tree_writer = TreeWriter::new(writer, WriteMode::Absolute);
        let sorted = changes.sorted_changes();
        for (key, count) in &sorted {
            tree_writer.write(*key, *count)?;
        }
        tree_writer.close();
        Ok(sorted.len())
    }

    /// Count for `key`: the in-memory total if any, else the persisted value, else zero.
    pub fn read(&self, key: &CountsKey) -> Result<i64> {
        let changed = self.changes.read().get(key);
        match changed {
            Some(count) => Ok(count),
            None => read_count_from_tree(&self.tree, key),
        }
    }

    /// Visits every non-zero count, in-memory totals first, then persisted ones they do
    /// not override.
    pub fn visit_all_counts(&self, visitor: &mut dyn CountVisitor) -> Result<()> {
        let changes = Arc::clone(&*self.changes.read());
        let visible = changes.visible_changes();
        let mut overridden = FxHashSet::default();
        for (key, count) in visible {
            overridden.insert(key);
            if count != 0 {
                visitor.visit(key, count)?;
            }
        }
        for entry in self.tree.seek(&CountsKey::MIN_COUNT, &CountsKey::MAX_COUNT)? {
            let (key, count) = entry?;
            if !overridden.contains(&key) {
                visitor.visit(key, count)?;
            }
        }
        Ok(())
    }

    /// Highest gap-free transaction id applied so far.
    pub fn tx_id(&self) -> TxId {
        self.id_sequence.highest_gap_free()
    }

    /// Verifies the tree structure and that persisted values obey the value rules.
    pub fn consistency_check(&self) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport {
            tree: self.tree.consistency_check()?,
            ..ConsistencyReport::default()
        };
        for entry in self.tree.seek(&CountsKey::LOWEST, &CountsKey::HIGHEST)? {
            let (key, value) = entry?;
            if key.is_count() {
                report.counts_checked += 1;
                if value <= 0 {
                    report
                        .invalid_entries
                        .push(format!("{key} has non-positive count {value}"));
                }
            } else if key.key_type() == TYPE_STRAY_TX_ID {
                if value != 0 {
                    report
                        .invalid_entries
                        .push(format!("{key} marker carries value {value}"));
                }
            } else {
                report.invalid_entries.push(format!("unknown key {key}"));
            }
        }
        debug!(
            store = %self.name,
            consistent = report.is_consistent(),
            counts = report.counts_checked,
            "counts.consistency_check"
        );
        Ok(report)
    }

    /// Prints the header's highest gap-free id and every entry of the file at `path`.
    ///
    /// Fails with [`SombraError::TreeFileNotFound`] without creating anything when the file
    /// is absent.
    pub fn dump(
        path: impl AsRef<Path>,
        out: &mut dyn Write,
        key_fmt: &dyn Fn(&CountsKey) -> String,
    ) -> Result<()> {
        let path = path.as_ref();
        let mut header = CountsHeaderReader::default();
        OrderedTree::read_header(path, &CountsLayout, &mut header)?;
        let tree = OrderedTree::open(
            path,
            CountsLayout,
            &TreeOptions { read_only: true },
            &mut CountsHeaderReader::default(),
        )?;
        writeln!(out, "Highest gap-free txId: {}", header.highest_gap_free_tx_id())?;
        tree.for_each(|key, value| {
            writeln!(out, "{} = {}", key_fmt(&key), value)?;
            Ok(())
        })?;
        tree.close()
    }

    /// Closes the store without checkpointing; unflushed deltas are recovered by replay.
    pub fn close(self) -> Result<()> {
        self.set_state(StoreState::Closed);
        info!(
            store = %self.name,
            pending = self.changes.read().len(),
            "counts.close"
        );
        self.tree.close()
    }

    fn set_state(&self, state: StoreState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

fn stray_tx_ids_in_tree(tree: &OrderedTree<CountsLayout>) -> Result<Vec<TxId>> {
    tree.seek(&CountsKey::MIN_STRAY_TX_ID, &CountsKey::MAX_STRAY_TX_ID)?
        .map(|entry| entry.map(|(key, _)| TxId(key.first())))
        .collect()
}
