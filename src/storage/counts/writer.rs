use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::primitives::tree::{self, Merge, OrderedTree};
use crate::types::{GroupId, LabelId, RelationshipDirection, Result, SombraError, TxId, TypeId};

use super::changes::CountsChanges;
use super::key::CountsKey;
use super::layout::CountsLayout;
use super::txid::OutOfOrderSequence;

/// Reads the persisted count for `key`, defaulting to zero.
pub(crate) fn read_count_from_tree(tree: &OrderedTree<CountsLayout>, key: &CountsKey) -> Result<i64> {
    match tree.get(key)? {
        None => Ok(0),
        Some(count) if count < 0 => Err(SombraError::InvalidCount {
            key: key.to_string(),
            count,
        }),
        Some(count) => Ok(count),
    }
}

/// Writes deltas into the live change map and records the transaction on close.
pub struct MapWriter<'a> {
    changes: Arc<CountsChanges>,
    tree: &'a OrderedTree<CountsLayout>,
    id_sequence: &'a OutOfOrderSequence,
    tx_id: TxId,
}

impl<'a> MapWriter<'a> {
    pub(crate) fn new(
        changes: Arc<CountsChanges>,
        tree: &'a OrderedTree<CountsLayout>,
        id_sequence: &'a OutOfOrderSequence,
        tx_id: TxId,
    ) -> Self {
        Self {
            changes,
            tree,
            id_sequence,
            tx_id,
        }
    }

    fn write(&mut self, key: CountsKey, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let tree = self.tree;
        self.changes
            .add(key, delta, |key| read_count_from_tree(tree, key))
    }

    fn close(self) -> Result<()> {
        self.id_sequence.offer(self.tx_id);
        Ok(())
    }
}

/// How a [`TreeWriter`] interprets the values it is given.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteMode {
    /// The value is the final count.
    Absolute,
    /// The value is added to the stored count.
    Delta,
}

/// Writes straight into the tree.
///
/// A positive resultant is stored, zero removes the key and a negative resultant fails
/// with [`SombraError::NegativeCount`].
pub struct TreeWriter<'a> {
    writer: tree::Writer<'a, CountsLayout>,
    mode: WriteMode,
}

impl<'a> TreeWriter<'a> {
    pub(crate) fn new(writer: tree::Writer<'a, CountsLayout>, mode: WriteMode) -> Self {
        Self { writer, mode }
    }

    pub(crate) fn write(&mut self, key: CountsKey, value: i64) -> Result<()> {
        if self.mode == WriteMode::Delta && value == 0 {
            return Ok(());
        }
        let mode = self.mode;
        self.writer.merge(&key, |existing| {
            let resultant = match mode {
                WriteMode::Absolute => value,
                WriteMode::Delta => existing.unwrap_or(0).checked_add(value).ok_or(
                    SombraError::Invalid("count overflow"),
                )?,
            };
            match resultant {
                count if count > 0 => Ok(Merge::Put(count)),
                0 if existing.is_some() => Ok(Merge::Remove),
                0 => Ok(Merge::Keep),
                count => Err(SombraError::NegativeCount {
                    key: key.to_string(),
                    count,
                }),
            }
        })
    }

    pub(crate) fn close(self) {
        self.writer.close();
    }
}

/// Destination of an updater's writes.
pub enum CountWriter<'a> {
    /// Steady state: the in-memory change map.
    Map(MapWriter<'a>),
    /// Rebuild and direct population: the tree itself.
    Tree(TreeWriter<'a>),
}

impl CountWriter<'_> {
    fn write(&mut self, key: CountsKey, delta: i64) -> Result<()> {
        match self {
            CountWriter::Map(writer) => writer.write(key, delta),
            CountWriter::Tree(writer) => writer.write(key, delta),
        }
    }

    fn close(self) -> Result<()> {
        match self {
            CountWriter::Map(writer) => writer.close(),
            CountWriter::Tree(writer) => {
                writer.close();
                Ok(())
            }
        }
    }
}

/// Store lock held by an updater for its whole life.
pub(crate) enum UpdaterLock<'a> {
    /// Concurrent transaction appliers.
    Shared(RwLockReadGuard<'a, ()>),
    /// Rebuild and direct updaters.
    Exclusive(RwLockWriteGuard<'a, ()>),
}

/// Applies one unit of work to a counts store.
///
/// The store lock is released when the updater is dropped, on every exit path. Dropping
/// without [`CountUpdater::close`] still closes the writer; failures are then only logged.
#[must_use = "an updater holds the store lock until it is closed"]
pub struct CountUpdater<'a> {
    writer: Option<CountWriter<'a>>,
    _lock: UpdaterLock<'a>,
}

impl<'a> CountUpdater<'a> {
    pub(crate) fn new(writer: CountWriter<'a>, lock: UpdaterLock<'a>) -> Self {
        Self {
            writer: Some(writer),
            _lock: lock,
        }
    }

    /// Adds `delta` to the count stored under `key`.
    pub fn increment(&mut self, key: CountsKey, delta: i64) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(key, delta),
            None => Err(SombraError::Invalid("updater already closed")),
        }
    }

    /// Adds `delta` to the number of nodes labelled `label`.
    pub fn increment_node_count(&mut self, label: LabelId, delta: i64) -> Result<()> {
        self.increment(CountsKey::node(label), delta)
    }

    /// Adds `delta` to the number of `(start)-[ty]->(end)` relationships.
    pub fn increment_relationship_count(
        &mut self,
        start: LabelId,
        ty: TypeId,
        end: LabelId,
        delta: i64,
    ) -> Result<()> {
        self.increment(CountsKey::relationship(start, ty, end), delta)
    }

    /// Adds `delta` to the degree of `group` in `direction`.
    pub fn increment_degree(
        &mut self,
        group: GroupId,
        direction: RelationshipDirection,
        delta: i64,
    ) -> Result<()> {
        self.increment(CountsKey::try_degree(group, direction)?, delta)
    }

    /// Finishes the unit of work and releases the store lock.
    pub fn close(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

impl Drop for CountUpdater<'_> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.close() {
                warn!(error = %err, "counts.updater.close_failed");
            }
        }
    }
}
