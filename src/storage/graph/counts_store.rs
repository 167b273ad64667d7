use std::io::Write;
use std::path::Path;

use crate::primitives::tree::IoLimiter;
use crate::storage::counts::{
    ConsistencyReport, CountUpdater, CountsKey, CountsKeyKind, CountsStoreOptions,
    GenericCountsStore, Rebuilder, StoreState,
};
use crate::types::{LabelId, Result, TxId, TypeId};

/// Receives typed counts during [`CountsStore::visit_all_counts`].
pub trait CountsVisitor {
    /// Number of nodes carrying `label`.
    fn visit_node_count(&mut self, label: LabelId, count: i64) -> Result<()>;

    /// Number of `(start)-[ty]->(end)` relationships.
    fn visit_relationship_count(
        &mut self,
        start: LabelId,
        ty: TypeId,
        end: LabelId,
        count: i64,
    ) -> Result<()>;
}

/// Node and relationship counts, keyed by label and relationship type.
pub struct CountsStore {
    inner: GenericCountsStore,
}

impl CountsStore {
    /// Opens or creates the counts file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        rebuilder: Box<dyn Rebuilder>,
        opts: &CountsStoreOptions,
    ) -> Result<Self> {
        Ok(Self {
            inner: GenericCountsStore::open(path, rebuilder, opts)?,
        })
    }

    /// Makes the store accept transactions, rebuilding it first if needed.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.inner.state()
    }

    /// Number of nodes labelled `label`; [`LabelId::ANY`] counts all nodes.
    pub fn node_count(&self, label: LabelId) -> Result<i64> {
        self.inner.read(&CountsKey::node(label))
    }

    /// Number of `(start)-[ty]->(end)` relationships. Any part may be the `ANY` sentinel.
    pub fn relationship_count(&self, start: LabelId, ty: TypeId, end: LabelId) -> Result<i64> {
        self.inner.read(&CountsKey::relationship(start, ty, end))
    }

    /// Updater for transaction `tx`, or `None` if its changes are already reflected.
    pub fn apply(&self, tx: TxId) -> Result<Option<CountsUpdater<'_>>> {
        Ok(self.inner.apply(tx)?.map(|inner| CountsUpdater { inner }))
    }

    /// Updater writing straight into the tree; see [`GenericCountsStore::direct_updater`].
    pub fn direct_updater(&self, apply_deltas: bool) -> Result<CountsUpdater<'_>> {
        Ok(CountsUpdater {
            inner: self.inner.direct_updater(apply_deltas)?,
        })
    }

    /// Writes pending changes and the applied transaction ids durably.
    pub fn checkpoint(&self, limiter: &dyn IoLimiter) -> Result<()> {
        self.inner.checkpoint(limiter)
    }

    /// Highest gap-free transaction id applied so far.
    pub fn tx_id(&self) -> TxId {
        self.inner.tx_id()
    }

    /// Visits every non-zero node and relationship count.
    pub fn visit_all_counts(&self, visitor: &mut dyn CountsVisitor) -> Result<()> {
        self.inner
            .visit_all_counts(&mut |key: CountsKey, count: i64| -> Result<()> {
                match key.kind() {
                    Some(CountsKeyKind::Node { label }) => visitor.visit_node_count(label, count),
                    Some(CountsKeyKind::Relationship { start, ty, end }) => {
                        visitor.visit_relationship_count(start, ty, end, count)
                    }
                    _ => Ok(()),
                }
            })
    }

    /// Structural and value check of the persisted counts.
    pub fn consistency_check(&self) -> Result<ConsistencyReport> {
        self.inner.consistency_check()
    }

    /// Prints the counts file at `path` without creating it.
    pub fn dump(path: impl AsRef<Path>, out: &mut dyn Write) -> Result<()> {
        GenericCountsStore::dump(path, out, &|key| key.to_string())
    }

    /// Closes without checkpointing.
    pub fn close(self) -> Result<()> {
        self.inner.close()
    }
}

/// Count changes of one transaction.
#[must_use = "an updater holds the store lock until it is closed"]
pub struct CountsUpdater<'a> {
    inner: CountUpdater<'a>,
}

impl CountsUpdater<'_> {
    /// Adds `delta` nodes labelled `label`.
    pub fn increment_node_count(&mut self, label: LabelId, delta: i64) -> Result<()> {
        self.inner.increment_node_count(label, delta)
    }

    /// Adds `delta` relationships `(start)-[ty]->(end)`.
    pub fn increment_relationship_count(
        &mut self,
        start: LabelId,
        ty: TypeId,
        end: LabelId,
        delta: i64,
    ) -> Result<()> {
        self.inner.increment_relationship_count(start, ty, end, delta)
    }

    /// Finishes the transaction's changes.
    pub fn close(self) -> Result<()> {
        self.inner.close()
    }
}
