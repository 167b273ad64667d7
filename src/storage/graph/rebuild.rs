//! Recomputing counts and degrees from the primary store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::storage::counts::{CountUpdater, CountsKey, Rebuilder};
use crate::types::{
    GroupId, LabelId, NodeId, RelId, RelationshipDirection, Result, SombraError, TxId, TypeId,
};

/// Labels of one node; most nodes carry only a few.
pub type LabelSet = SmallVec<[LabelId; 4]>;

/// Node record as seen by a rebuild scan.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    /// Record id.
    pub id: NodeId,
    /// Whether the record holds a live node.
    pub in_use: bool,
    /// Labels of the node.
    pub labels: LabelSet,
}

/// Relationship record as seen by a rebuild scan.
#[derive(Clone, Debug)]
pub struct RelationshipRecord {
    /// Record id.
    pub id: RelId,
    /// Whether the record holds a live relationship.
    pub in_use: bool,
    /// Start node.
    pub start: NodeId,
    /// Relationship type.
    pub ty: TypeId,
    /// End node.
    pub end: NodeId,
}

/// Relationship group record: the relationships of one type around one node, split into
/// directional chains.
#[derive(Clone, Debug)]
pub struct RelationshipGroupRecord {
    /// Record id.
    pub id: GroupId,
    /// Whether the record is live.
    pub in_use: bool,
    /// Node the group belongs to.
    pub owner: NodeId,
    /// Type of every relationship in the group.
    pub ty: TypeId,
    /// Relationships leaving the owner.
    pub outgoing: Vec<RelId>,
    /// Relationships entering the owner.
    pub incoming: Vec<RelId>,
    /// Relationships starting and ending at the owner.
    pub loops: Vec<RelId>,
}

impl RelationshipGroupRecord {
    /// The chain for `direction`.
    pub fn chain(&self, direction: RelationshipDirection) -> &[RelId] {
        match direction {
            RelationshipDirection::Outgoing => &self.outgoing,
            RelationshipDirection::Incoming => &self.incoming,
            RelationshipDirection::Loop => &self.loops,
        }
    }

    fn chain_mut(&mut self, direction: RelationshipDirection) -> &mut Vec<RelId> {
        match direction {
            RelationshipDirection::Outgoing => &mut self.outgoing,
            RelationshipDirection::Incoming => &mut self.incoming,
            RelationshipDirection::Loop => &mut self.loops,
        }
    }
}

/// Full scans over the primary store, used only by rebuilds.
pub trait GraphStoreScan: Send + Sync {
    /// Id of the last transaction the primary store reflects.
    fn last_committed_tx_id(&self) -> TxId;

    /// Visits every node record, in use or not.
    fn scan_nodes(&self, visit: &mut dyn FnMut(&NodeRecord) -> Result<()>) -> Result<()>;

    /// Visits every relationship record, in use or not.
    fn scan_relationships(
        &self,
        visit: &mut dyn FnMut(&RelationshipRecord) -> Result<()>,
    ) -> Result<()>;

    /// Visits every relationship group record, in use or not.
    fn scan_relationship_groups(
        &self,
        visit: &mut dyn FnMut(&RelationshipGroupRecord) -> Result<()>,
    ) -> Result<()>;
}

/// Rebuilds node and relationship counts from a [`GraphStoreScan`].
pub struct CountsRebuilder<G> {
    graph: Arc<G>,
}

impl<G: GraphStoreScan> CountsRebuilder<G> {
    /// Rebuilder scanning `graph`.
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }
}

impl<G: GraphStoreScan + 'static> Rebuilder for CountsRebuilder<G> {
    fn last_committed_tx_id(&self) -> TxId {
        self.graph.last_committed_tx_id()
    }

    fn rebuild(&self, updater: &mut CountUpdater<'_>) -> Result<()> {
        let mut totals: FxHashMap<CountsKey, i64> = FxHashMap::default();
        let mut node_labels: FxHashMap<NodeId, LabelSet> = FxHashMap::default();
        let mut nodes = 0u64;
        self.graph.scan_nodes(&mut |node| {
            if !node.in_use {
                return Ok(());
            }
            nodes += 1;
            *totals.entry(CountsKey::node(LabelId::ANY)).or_default() += 1;
            for &label in &node.labels {
                *totals.entry(CountsKey::node(label)).or_default() += 1;
            }
            if !node.labels.is_empty() {
                node_labels.insert(node.id, node.labels.clone());
            }
            Ok(())
        })?;

        let empty = LabelSet::new();
        let mut relationships = 0u64;
        self.graph.scan_relationships(&mut |rel| {
            if !rel.in_use {
                return Ok(());
            }
            relationships += 1;
            let mut bump = |start: LabelId, ty: TypeId, end: LabelId| {
                *totals
                    .entry(CountsKey::relationship(start, ty, end))
                    .or_default() += 1;
            };
            bump(LabelId::ANY, rel.ty, LabelId::ANY);
            bump(LabelId::ANY, TypeId::ANY, LabelId::ANY);
            for &label in node_labels.get(&rel.start).unwrap_or(&empty) {
                bump(label, rel.ty, LabelId::ANY);
                bump(label, TypeId::ANY, LabelId::ANY);
            }
            for &label in node_labels.get(&rel.end).unwrap_or(&empty) {
                bump(LabelId::ANY, rel.ty, label);
                bump(LabelId::ANY, TypeId::ANY, label);
            }
            Ok(())
        })?;

        debug!(nodes, relationships, keys = totals.len(), "counts.rebuild.scanned");
        let mut sorted: Vec<(CountsKey, i64)> = totals.into_iter().collect();
        sorted.sort_unstable_by_key(|(key, _)| *key);
        for (key, count) in sorted {
            updater.increment(key, count)?;
        }
        Ok(())
    }
}

/// Rebuilds relationship group degrees from a [`GraphStoreScan`].
pub struct DegreesRebuilder<G> {
    graph: Arc<G>,
}

impl<G: GraphStoreScan> DegreesRebuilder<G> {
    /// Rebuilder scanning `graph`.
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }
}

impl<G: GraphStoreScan + 'static> Rebuilder for DegreesRebuilder<G> {
    fn last_committed_tx_id(&self) -> TxId {
        self.graph.last_committed_tx_id()
    }

    fn rebuild(&self, updater: &mut CountUpdater<'_>) -> Result<()> {
        let mut groups = 0u64;
        self.graph.scan_relationship_groups(&mut |group| {
            if !group.in_use {
                return Ok(());
            }
            groups += 1;
            for direction in RelationshipDirection::ALL {
                let degree = group.chain(direction).len() as i64;
                if degree > 0 {
                    updater.increment_degree(group.id, direction, degree)?;
                }
            }
            Ok(())
        })?;
        debug!(groups, "degrees.rebuild.scanned");
        Ok(())
    }
}

/// In-memory primary store, for tests and tools without a record store.
#[derive(Default)]
pub struct MemoryGraph {
    inner: RwLock<MemoryGraphInner>,
}

#[derive(Default)]
struct MemoryGraphInner {
    nodes: BTreeMap<NodeId, NodeRecord>,
    relationships: BTreeMap<RelId, RelationshipRecord>,
    groups: BTreeMap<GroupId, RelationshipGroupRecord>,
    next_node: u64,
    next_relationship: u64,
    next_group: u64,
    last_committed: u64,
}

impl MemoryGraph {
    /// Empty graph whose last committed transaction is [`TxId::BASE`].
    pub fn new() -> Self {
        let graph = Self::default();
        graph.inner.write().last_committed = TxId::BASE.0;
        graph
    }

    /// Records `tx` as the last committed transaction.
    pub fn set_last_committed_tx_id(&self, tx: TxId) {
        self.inner.write().last_committed = tx.0;
    }

    /// Creates a node carrying `labels`.
    pub fn create_node(&self, labels: &[LabelId]) -> NodeId {
        let mut inner = self.inner.write();
        let id = NodeId(inner.next_node);
        inner.next_node += 1;
        inner.nodes.insert(
            id,
            NodeRecord {
                id,
                in_use: true,
                labels: labels.iter().copied().collect(),
            },
        );
        id
    }

    /// Marks a node record unused. The record stays visible to scans.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.nodes.get_mut(&id).ok_or(SombraError::NotFound)?;
        node.in_use = false;
        Ok(())
    }

    /// Labels of a live node.
    pub fn node_labels(&self, id: NodeId) -> Result<LabelSet> {
        let inner = self.inner.read();
        match inner.nodes.get(&id) {
            Some(node) if node.in_use => Ok(node.labels.clone()),
            _ => Err(SombraError::NotFound),
        }
    }

    /// Creates a relationship between two live nodes.
    pub fn create_relationship(&self, start: NodeId, ty: TypeId, end: NodeId) -> Result<RelId> {
        let mut inner = self.inner.write();
        for node in [start, end] {
            if !inner.nodes.get(&node).map_or(false, |n| n.in_use) {
                return Err(SombraError::NotFound);
            }
        }
        let id = RelId(inner.next_relationship);
        inner.next_relationship += 1;
        inner.relationships.insert(
            id,
            RelationshipRecord {
                id,
                in_use: true,
                start,
                ty,
                end,
            },
        );
        Ok(id)
    }

    /// Marks a relationship record unused.
    pub fn delete_relationship(&self, id: RelId) -> Result<RelationshipRecord> {
        let mut inner = self.inner.write();
        let rel = inner
            .relationships
            .get_mut(&id)
            .ok_or(SombraError::NotFound)?;
        if !rel.in_use {
            return Err(SombraError::NotFound);
        }
        rel.in_use = false;
        Ok(rel.clone())
    }

    /// Creates an empty relationship group for `owner` and `ty`.
    pub fn create_relationship_group(&self, owner: NodeId, ty: TypeId) -> GroupId {
        let mut inner = self.inner.write();
        let id = GroupId(inner.next_group);
        inner.next_group += 1;
        inner.groups.insert(
            id,
            RelationshipGroupRecord {
                id,
                in_use: true,
                owner,
                ty,
                outgoing: Vec::new(),
                incoming: Vec::new(),
                loops: Vec::new(),
            },
        );
        id
    }

    /// Appends `rel` to the `direction` chain of `group`.
    pub fn link_to_group(
        &self,
        group: GroupId,
        direction: RelationshipDirection,
        rel: RelId,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let record = inner.groups.get_mut(&group).ok_or(SombraError::NotFound)?;
        record.chain_mut(direction).push(rel);
        Ok(())
    }

    /// Removes `rel` from the `direction` chain of `group`.
    pub fn unlink_from_group(
        &self,
        group: GroupId,
        direction: RelationshipDirection,
        rel: RelId,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let record = inner.groups.get_mut(&group).ok_or(SombraError::NotFound)?;
        let chain = record.chain_mut(direction);
        let pos = chain
            .iter()
            .position(|&r| r == rel)
            .ok_or(SombraError::NotFound)?;
        chain.remove(pos);
        Ok(())
    }
}

impl GraphStoreScan for MemoryGraph {
    fn last_committed_tx_id(&self) -> TxId {
        TxId(self.inner.read().last_committed)
    }

    fn scan_nodes(&self, visit: &mut dyn FnMut(&NodeRecord) -> Result<()>) -> Result<()> {
        let nodes: Vec<NodeRecord> = self.inner.read().nodes.values().cloned().collect();
        nodes.iter().try_for_each(|node| visit(node))
    }

    fn scan_relationships(
        &self,
        visit: &mut dyn FnMut(&RelationshipRecord) -> Result<()>,
    ) -> Result<()> {
        let rels: Vec<RelationshipRecord> =
            self.inner.read().relationships.values().cloned().collect();
        rels.iter().try_for_each(|rel| visit(rel))
    }

    fn scan_relationship_groups(
        &self,
        visit: &mut dyn FnMut(&RelationshipGroupRecord) -> Result<()>,
    ) -> Result<()> {
        let groups: Vec<RelationshipGroupRecord> =
            self.inner.read().groups.values().cloned().collect();
        groups.iter().try_for_each(|group| visit(group))
    }
}
