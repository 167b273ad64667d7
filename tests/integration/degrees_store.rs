#![forbid(unsafe_code)]

use std::sync::Arc;

use sombra_counts::primitives::tree::Unlimited;
use sombra_counts::storage::counts::{CountsStoreOptions, StoreState, EMPTY_REBUILD};
use sombra_counts::storage::graph::{
    DegreesRebuilder, DegreesStore, DisabledDegreesStore, MemoryGraph,
    RelationshipGroupDegreesStore,
};
use sombra_counts::types::{GroupId, RelationshipDirection, Result, SombraError, TxId, TypeId};
use tempfile::tempdir;

use RelationshipDirection::{Incoming, Loop, Outgoing};

fn open(path: &std::path::Path, graph: Arc<MemoryGraph>) -> Result<RelationshipGroupDegreesStore> {
    RelationshipGroupDegreesStore::open(
        path,
        Box::new(DegreesRebuilder::new(graph)),
        &CountsStoreOptions::new("degrees"),
    )
}

#[test]
fn degrees_follow_transactions_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("degrees.db");
    let graph = Arc::new(MemoryGraph::new());
    let hub = graph.create_node(&[]);
    let leaf = graph.create_node(&[]);
    let group = graph.create_relationship_group(hub, TypeId(2));
    let rel = graph.create_relationship(leaf, TypeId(2), hub)?;
    graph.link_to_group(group, Incoming, rel)?;
    graph.set_last_committed_tx_id(TxId(5));

    let store = open(&path, Arc::clone(&graph))?;
    store.start()?;
    assert_eq!(store.degree(group, Incoming)?, 1);

    let mut updater = store.apply(TxId(6))?.expect("updater");
    updater.increment_degree(group, Outgoing, 2)?;
    updater.increment_degree(group, Incoming, -1)?;
    updater.close()?;
    store.checkpoint(&Unlimited)?;
    Box::new(store).close()?;

    let store = open(&path, graph)?;
    assert_eq!(store.state(), StoreState::Ready);
    store.start()?;
    assert_eq!(store.tx_id(), TxId(6));
    assert_eq!(store.degree(group, Outgoing)?, 2);
    assert_eq!(store.degree(group, Incoming)?, 0);
    assert_eq!(store.degree(group, Loop)?, 0);
    assert!(store.apply(TxId(6))?.is_none());
    assert!(store.consistency_check()?.is_consistent());
    Ok(())
}

#[test]
fn unused_groups_are_skipped_by_rebuild() -> Result<()> {
    let dir = tempdir()?;
    let graph = Arc::new(MemoryGraph::new());
    let a = graph.create_node(&[]);
    let live = graph.create_relationship_group(a, TypeId(1));
    let rel = graph.create_relationship(a, TypeId(1), a)?;
    graph.link_to_group(live, Loop, rel)?;

    let store = open(&dir.path().join("degrees.db"), graph)?;
    store.start()?;
    let mut seen = Vec::new();
    store.visit_all_degrees(&mut |group, direction, count| {
        seen.push((group, direction, count));
        Ok(())
    })?;
    assert_eq!(seen, vec![(live, Loop, 1)]);
    Ok(())
}

#[test]
fn direct_updater_populates_degrees() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("degrees.db");
    let store = RelationshipGroupDegreesStore::open(
        &path,
        Box::new(EMPTY_REBUILD),
        &CountsStoreOptions::new("degrees"),
    )?;
    store.start()?;
    let mut updater = store.direct_updater(false)?;
    for g in 0..4u64 {
        updater.increment_degree(GroupId(g), Outgoing, (g + 1) as i64)?;
    }
    updater.close()?;
    store.checkpoint(&Unlimited)?;
    assert_eq!(store.degree(GroupId(3), Outgoing)?, 4);

    let mut out = Vec::new();
    RelationshipGroupDegreesStore::dump(&path, &mut out)?;
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text.lines().count(), 5);
    assert!(text.contains("Degree[group:3, OUTGOING] = 4"));
    Ok(())
}

#[test]
fn disabled_store_is_inert() -> Result<()> {
    let stores: Vec<Box<dyn DegreesStore>> = vec![Box::new(DisabledDegreesStore)];
    for store in stores {
        store.start()?;
        assert_eq!(store.degree(GroupId(9), Incoming)?, 0);
        assert!(matches!(
            store.apply(TxId(2)),
            Err(SombraError::Unsupported(_))
        ));
        store.checkpoint(&Unlimited)?;
        store.close()?;
    }
    Ok(())
}
