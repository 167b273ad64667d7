#![forbid(unsafe_code)]

use std::sync::Arc;

use sombra_counts::primitives::tree::Unlimited;
use sombra_counts::storage::counts::{CountsStoreOptions, StoreState, EMPTY_REBUILD};
use sombra_counts::storage::graph::{CountsRebuilder, CountsStore, MemoryGraph};
use sombra_counts::types::{LabelId, Result, TxId, TypeId};
use tempfile::tempdir;

fn opts() -> CountsStoreOptions {
    CountsStoreOptions::new("counts")
}

#[test]
fn replayed_transaction_is_rejected_after_checkpoint() -> Result<()> {
    let dir = tempdir()?;
    let graph = Arc::new(MemoryGraph::new());
    graph.set_last_committed_tx_id(TxId(9));
    let store = CountsStore::open(
        dir.path().join("counts.db"),
        Box::new(CountsRebuilder::new(graph)),
        &opts(),
    )?;
    store.start()?;
    assert_eq!(store.tx_id(), TxId(9));

    for tx in [10, 11] {
        let mut updater = store.apply(TxId(tx))?.expect("fresh transaction");
        updater.increment_node_count(LabelId(5), 1)?;
        updater.close()?;
    }
    store.checkpoint(&Unlimited)?;
    assert_eq!(store.node_count(LabelId(5))?, 2);

    assert!(store.apply(TxId(10))?.is_none());
    assert_eq!(store.node_count(LabelId(5))?, 2);
    assert_eq!(store.tx_id(), TxId(11));
    Ok(())
}

#[test]
fn recovery_replays_only_missing_transactions() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.db");
    let store = CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts())?;
    store.start()?;
    let mut updater = store.apply(TxId(2))?.expect("updater");
    updater.increment_relationship_count(LabelId::ANY, TypeId(3), LabelId::ANY, 1)?;
    updater.close()?;
    store.checkpoint(&Unlimited)?;
    let mut updater = store.apply(TxId(3))?.expect("updater");
    updater.increment_relationship_count(LabelId::ANY, TypeId(3), LabelId::ANY, 1)?;
    updater.close()?;
    // crash: drop the in-memory delta of tx 3
    store.close()?;

    let store = CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts())?;
    assert_eq!(store.state(), StoreState::Ready);
    for tx in [2, 3] {
        if let Some(mut updater) = store.apply(TxId(tx))? {
            updater.increment_relationship_count(LabelId::ANY, TypeId(3), LabelId::ANY, 1)?;
            updater.close()?;
        }
    }
    store.start()?;
    assert_eq!(
        store.relationship_count(LabelId::ANY, TypeId(3), LabelId::ANY)?,
        2
    );
    Ok(())
}

#[test]
fn recovery_before_start_is_ignored_when_rebuild_pending() -> Result<()> {
    let dir = tempdir()?;
    let graph = Arc::new(MemoryGraph::new());
    graph.create_node(&[LabelId(1)]);
    graph.set_last_committed_tx_id(TxId(4));
    let store = CountsStore::open(
        dir.path().join("counts.db"),
        Box::new(CountsRebuilder::new(graph)),
        &opts(),
    )?;
    assert_eq!(store.state(), StoreState::RebuildNeeded);
    // the rebuild already reflects these transactions
    for tx in 2..=4 {
        assert!(store.apply(TxId(tx))?.is_none());
    }
    store.start()?;
    assert_eq!(store.node_count(LabelId(1))?, 1);
    assert_eq!(store.node_count(LabelId::ANY)?, 1);
    assert!(store.apply(TxId(4))?.is_none());
    assert!(store.apply(TxId(5))?.is_some());
    Ok(())
}

#[test]
fn checkpoint_output_is_readable_by_dump() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.db");
    let store = CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts())?;
    store.start()?;
    let mut updater = store.apply(TxId(3))?.expect("updater");
    updater.increment_node_count(LabelId::ANY, 2)?;
    updater.increment_relationship_count(LabelId(1), TypeId(2), LabelId::ANY, 1)?;
    updater.close()?;
    store.checkpoint(&Unlimited)?;
    store.close()?;

    let mut out = Vec::new();
    CountsStore::dump(&path, &mut out)?;
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Highest gap-free txId: 1");
    assert_eq!(lines[1], "StrayTxId[3] = 0");
    assert_eq!(lines.len(), 4);
    Ok(())
}
