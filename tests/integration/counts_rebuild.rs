#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_counts::primitives::tree::Unlimited;
use sombra_counts::storage::counts::{CountsStoreOptions, EMPTY_REBUILD};
use sombra_counts::storage::graph::{
    CountsRebuilder, CountsStore, CountsUpdater, CountsVisitor, MemoryGraph,
};
use sombra_counts::types::{LabelId, NodeId, RelId, Result, TxId, TypeId};
use tempfile::tempdir;

const ANY: LabelId = LabelId::ANY;

#[derive(Default, Debug, PartialEq)]
struct Snapshot {
    nodes: BTreeMap<LabelId, i64>,
    relationships: BTreeMap<(LabelId, TypeId, LabelId), i64>,
}

impl CountsVisitor for Snapshot {
    fn visit_node_count(&mut self, label: LabelId, count: i64) -> Result<()> {
        assert!(self.nodes.insert(label, count).is_none());
        Ok(())
    }

    fn visit_relationship_count(
        &mut self,
        start: LabelId,
        ty: TypeId,
        end: LabelId,
        count: i64,
    ) -> Result<()> {
        assert!(self.relationships.insert((start, ty, end), count).is_none());
        Ok(())
    }
}

fn snapshot(store: &CountsStore) -> Result<Snapshot> {
    let mut snap = Snapshot::default();
    store.visit_all_counts(&mut snap)?;
    Ok(snap)
}

fn relationship_deltas(
    updater: &mut CountsUpdater<'_>,
    start_labels: &[LabelId],
    ty: TypeId,
    end_labels: &[LabelId],
    delta: i64,
) -> Result<()> {
    updater.increment_relationship_count(ANY, ty, ANY, delta)?;
    updater.increment_relationship_count(ANY, TypeId::ANY, ANY, delta)?;
    for &label in start_labels {
        updater.increment_relationship_count(label, ty, ANY, delta)?;
        updater.increment_relationship_count(label, TypeId::ANY, ANY, delta)?;
    }
    for &label in end_labels {
        updater.increment_relationship_count(ANY, ty, label, delta)?;
        updater.increment_relationship_count(ANY, TypeId::ANY, label, delta)?;
    }
    Ok(())
}

/// Builds a random graph while maintaining `store` incrementally, one transaction per
/// change. Returns the id of the last transaction.
fn grow(graph: &MemoryGraph, store: &CountsStore, seed: u64) -> Result<TxId> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let labels: Vec<LabelId> = (0..5).map(LabelId).collect();
    let mut nodes: Vec<NodeId> = Vec::new();
    let mut rels: Vec<(RelId, NodeId, TypeId, NodeId)> = Vec::new();
    let mut tx = TxId::BASE.0;

    for _ in 0..300 {
        tx += 1;
        let mut updater = store.apply(TxId(tx))?.expect("fresh transaction");
        let roll = rng.gen_range(0..10);
        if nodes.len() < 2 || roll < 4 {
            let count = rng.gen_range(0..3);
            let picked: Vec<LabelId> = labels.choose_multiple(&mut rng, count).copied().collect();
            nodes.push(graph.create_node(&picked));
            updater.increment_node_count(ANY, 1)?;
            for &label in &picked {
                updater.increment_node_count(label, 1)?;
            }
        } else if roll < 8 || rels.is_empty() {
            let start = *nodes.choose(&mut rng).expect("nodes");
            let end = *nodes.choose(&mut rng).expect("nodes");
            let ty = TypeId(rng.gen_range(0..3));
            let id = graph.create_relationship(start, ty, end)?;
            rels.push((id, start, ty, end));
            let start_labels = graph.node_labels(start)?;
            let end_labels = graph.node_labels(end)?;
            relationship_deltas(&mut updater, &start_labels, ty, &end_labels, 1)?;
        } else {
            let index = rng.gen_range(0..rels.len());
            let (id, start, ty, end) = rels.swap_remove(index);
            graph.delete_relationship(id)?;
            let start_labels = graph.node_labels(start)?;
            let end_labels = graph.node_labels(end)?;
            relationship_deltas(&mut updater, &start_labels, ty, &end_labels, -1)?;
        }
        updater.close()?;
        if tx % 50 == 0 {
            store.checkpoint(&Unlimited)?;
        }
    }
    graph.set_last_committed_tx_id(TxId(tx));
    Ok(TxId(tx))
}

#[test]
fn rebuild_matches_incremental_maintenance() -> Result<()> {
    let dir = tempdir()?;
    for seed in [1u64, 7, 42] {
        let graph = Arc::new(MemoryGraph::new());
        let incremental = CountsStore::open(
            dir.path().join(format!("incremental-{seed}.db")),
            Box::new(EMPTY_REBUILD),
            &CountsStoreOptions::new("incremental"),
        )?;
        incremental.start()?;
        let last = grow(&graph, &incremental, seed)?;
        incremental.checkpoint(&Unlimited)?;

        let rebuilt = CountsStore::open(
            dir.path().join(format!("rebuilt-{seed}.db")),
            Box::new(CountsRebuilder::new(Arc::clone(&graph))),
            &CountsStoreOptions::new("rebuilt"),
        )?;
        rebuilt.start()?;
        assert_eq!(rebuilt.tx_id(), last);
        assert_eq!(snapshot(&rebuilt)?, snapshot(&incremental)?);
        assert!(rebuilt.consistency_check()?.is_consistent());
    }
    Ok(())
}

#[test]
fn rebuilt_counts_persist_without_a_second_rebuild() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.db");
    let graph = Arc::new(MemoryGraph::new());
    let a = graph.create_node(&[LabelId(1)]);
    let b = graph.create_node(&[LabelId(2)]);
    graph.create_relationship(a, TypeId(0), b)?;
    graph.set_last_committed_tx_id(TxId(3));

    let store = CountsStore::open(
        &path,
        Box::new(CountsRebuilder::new(Arc::clone(&graph))),
        &CountsStoreOptions::default(),
    )?;
    store.start()?;
    store.checkpoint(&Unlimited)?;
    let before = snapshot(&store)?;
    store.close()?;

    // a changed graph is not rescanned once counts exist
    graph.create_node(&[LabelId(1)]);
    let store = CountsStore::open(
        &path,
        Box::new(CountsRebuilder::new(graph)),
        &CountsStoreOptions::default(),
    )?;
    store.start()?;
    assert_eq!(snapshot(&store)?, before);
    assert_eq!(store.relationship_count(LabelId(1), TypeId(0), LabelId(2))?, 0);
    assert_eq!(store.relationship_count(LabelId(1), TypeId(0), ANY)?, 1);
    assert_eq!(store.relationship_count(ANY, TypeId(0), LabelId(2))?, 1);
    Ok(())
}
