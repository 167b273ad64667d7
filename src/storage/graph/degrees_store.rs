use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::primitives::tree::IoLimiter;
use crate::storage::counts::{
    ConsistencyReport, CountUpdater, CountsKey, CountsKeyKind, CountsStoreOptions,
    GenericCountsStore, Rebuilder, StoreState,
};
use crate::types::{GroupId, RelationshipDirection, Result, SombraError, TxId};

/// Degrees of relationship groups, as seen by the transaction layer.
///
/// Implemented by [`RelationshipGroupDegreesStore`] and by [`DisabledDegreesStore`] for
/// databases that do not keep group degrees.
pub trait DegreesStore: Send + Sync {
    /// Number of relationships in the `direction` chain of `group`.
    fn degree(&self, group: GroupId, direction: RelationshipDirection) -> Result<i64>;

    /// Updater for transaction `tx`, or `None` if its changes are already reflected.
    fn apply(&self, tx: TxId) -> Result<Option<DegreeUpdater<'_>>>;

    /// Makes the store accept transactions.
    fn start(&self) -> Result<()>;

    /// Writes pending degree changes durably.
    fn checkpoint(&self, limiter: &dyn IoLimiter) -> Result<()>;

    /// Highest gap-free transaction id applied so far.
    fn tx_id(&self) -> TxId;

    /// Releases the store without checkpointing.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Degree changes of one transaction.
#[must_use = "an updater holds the store lock until it is closed"]
pub struct DegreeUpdater<'a> {
    inner: CountUpdater<'a>,
}

impl DegreeUpdater<'_> {
    /// Adds `delta` to the degree of `group` in `direction`.
    pub fn increment_degree(
        &mut self,
        group: GroupId,
        direction: RelationshipDirection,
        delta: i64,
    ) -> Result<()> {
        self.inner.increment_degree(group, direction, delta)
    }

    /// Finishes the transaction's changes.
    pub fn close(self) -> Result<()> {
        self.inner.close()
    }
}

/// Persistent degrees of dense-node relationship groups.
pub struct RelationshipGroupDegreesStore {
    inner: GenericCountsStore,
}

impl RelationshipGroupDegreesStore {
    /// Opens or creates the degrees file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        rebuilder: Box<dyn Rebuilder>,
        opts: &CountsStoreOptions,
    ) -> Result<Self> {
        Ok(Self {
            inner: GenericCountsStore::open(path, rebuilder, opts)?,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.inner.state()
    }

    /// Updater writing straight into the tree; see [`GenericCountsStore::direct_updater`].
    pub fn direct_updater(&self, apply_deltas: bool) -> Result<DegreeUpdater<'_>> {
        Ok(DegreeUpdater {
            inner: self.inner.direct_updater(apply_deltas)?,
        })
    }

    /// Visits every non-zero degree.
    pub fn visit_all_degrees(
        &self,
        visitor: &mut dyn FnMut(GroupId, RelationshipDirection, i64) -> Result<()>,
    ) -> Result<()> {
        self.inner
            .visit_all_counts(&mut |key: CountsKey, count: i64| -> Result<()> {
                match key.kind() {
                    Some(CountsKeyKind::Degree { group, direction }) => {
                        visitor(group, direction, count)
                    }
                    _ => Ok(()),
                }
            })
    }

    /// Structural and value check of the persisted degrees.
    pub fn consistency_check(&self) -> Result<ConsistencyReport> {
        self.inner.consistency_check()
    }

    /// Prints the degrees file at `path` without creating it.
    pub fn dump(path: impl AsRef<Path>, out: &mut dyn Write) -> Result<()> {
        GenericCountsStore::dump(path, out, &|key| key.to_string())
    }
}

impl DegreesStore for RelationshipGroupDegreesStore {
    fn degree(&self, group: GroupId, direction: RelationshipDirection) -> Result<i64> {
        self.inner.read(&CountsKey::try_degree(group, direction)?)
    }

    fn apply(&self, tx: TxId) -> Result<Option<DegreeUpdater<'_>>> {
        Ok(self.inner.apply(tx)?.map(|inner| DegreeUpdater { inner }))
    }

    fn start(&self) -> Result<()> {
        self.inner.start()
    }

    fn checkpoint(&self, limiter: &dyn IoLimiter) -> Result<()> {
        self.inner.checkpoint(limiter)
    }

    fn tx_id(&self) -> TxId {
        self.inner.tx_id()
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.inner.close()
    }
}

/// Degrees store for databases without group degrees: reads are zero and nothing can be
/// written.
#[derive(Copy, Clone, Debug, Default)]
pub struct DisabledDegreesStore;

impl DegreesStore for DisabledDegreesStore {
    fn degree(&self, _group: GroupId, _direction: RelationshipDirection) -> Result<i64> {
        Ok(0)
    }

    fn apply(&self, tx: TxId) -> Result<Option<DegreeUpdater<'_>>> {
        debug!(tx = tx.0, "degrees.disabled.apply_rejected");
        Err(SombraError::Unsupported("degrees store is disabled"))
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn checkpoint(&self, _limiter: &dyn IoLimiter) -> Result<()> {
        Ok(())
    }

    fn tx_id(&self) -> TxId {
        TxId::BASE
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
