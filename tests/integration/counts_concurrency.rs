#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_counts::primitives::tree::Unlimited;
use sombra_counts::storage::counts::{CountsStoreOptions, StoreState, EMPTY_REBUILD};
use sombra_counts::storage::graph::CountsStore;
use sombra_counts::types::{LabelId, Result, TxId};
use tempfile::tempdir;

const THREADS: u64 = 6;
const TXS_PER_THREAD: u64 = 200;
const LABELS: u32 = 12;

fn tx_ids(thread: u64) -> impl Iterator<Item = TxId> {
    (0..TXS_PER_THREAD).map(move |k| TxId(2 + thread + k * THREADS))
}

#[test]
fn concurrent_appliers_and_checkpoints_lose_nothing() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.db");
    let opts = CountsStoreOptions::new("stress").max_cache_size(8);
    let store = Arc::new(CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts)?);
    store.start()?;

    let barrier = Arc::new(Barrier::new(THREADS as usize + 1));
    let done = Arc::new(AtomicBool::new(false));
    let checkpointer = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<u32> {
            barrier.wait();
            let mut checkpoints = 0;
            while !done.load(Ordering::Acquire) {
                store.checkpoint(&Unlimited)?;
                checkpoints += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Ok(checkpoints)
        })
    };

    let mut appliers = Vec::new();
    for t in 0..THREADS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        appliers.push(thread::spawn(move || -> Result<BTreeMap<u32, i64>> {
            let mut rng = ChaCha8Rng::seed_from_u64(0xC0DE + t);
            let mut expected = BTreeMap::new();
            barrier.wait();
            for tx in tx_ids(t) {
                let mut updater = store.apply(tx)?.expect("every id is fresh");
                for _ in 0..rng.gen_range(1..4) {
                    let label = rng.gen_range(0..LABELS);
                    let delta = rng.gen_range(1..5);
                    updater.increment_node_count(LabelId(label), delta)?;
                    *expected.entry(label).or_insert(0) += delta;
                }
                updater.close()?;
            }
            Ok(expected)
        }));
    }

    let mut expected: BTreeMap<u32, i64> = BTreeMap::new();
    for handle in appliers {
        for (label, count) in handle.join().expect("applier panicked")? {
            *expected.entry(label).or_insert(0) += count;
        }
    }
    done.store(true, Ordering::Release);
    checkpointer.join().expect("checkpointer panicked")?;

    let last = TxId(1 + THREADS * TXS_PER_THREAD);
    assert_eq!(store.tx_id(), last);
    for (&label, &count) in &expected {
        assert_eq!(store.node_count(LabelId(label))?, count);
    }
    store.checkpoint(&Unlimited)?;
    let store = Arc::try_unwrap(store).ok().expect("sole owner");
    store.close()?;

    let store = CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts)?;
    assert_eq!(store.state(), StoreState::Ready);
    store.start()?;
    assert_eq!(store.tx_id(), last);
    for t in 0..THREADS {
        for tx in tx_ids(t) {
            assert!(store.apply(tx)?.is_none());
        }
    }
    for (&label, &count) in &expected {
        assert_eq!(store.node_count(LabelId(label))?, count);
    }
    assert!(store.consistency_check()?.is_consistent());
    Ok(())
}

const MAX_IMAGES: usize = 16;

type TxLog = Vec<(TxId, Vec<(u32, i64)>)>;

#[test]
fn checkpoint_images_taken_mid_run_replay_to_the_live_totals() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.db");
    let opts = CountsStoreOptions::new("replay").max_cache_size(8);
    let store = Arc::new(CountsStore::open(&path, Box::new(EMPTY_REBUILD), &opts)?);
    store.start()?;

    let log: Arc<Mutex<TxLog>> = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(THREADS as usize + 1));
    let done = Arc::new(AtomicBool::new(false));
    let checkpointer = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        let image_dir = dir.path().to_path_buf();
        let path = path.clone();
        thread::spawn(move || -> Result<Vec<PathBuf>> {
            barrier.wait();
            let mut images = Vec::new();
            let mut round = 0u32;
            loop {
                store.checkpoint(&Unlimited)?;
                // Only this thread checkpoints, so the file holds exactly that image.
                if images.len() < MAX_IMAGES && round % 2 == 0 {
                    let image = image_dir.join(format!("image-{round}.db"));
                    fs::copy(&path, &image)?;
                    images.push(image);
                }
                round += 1;
                if done.load(Ordering::Acquire) {
                    return Ok(images);
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let mut appliers = Vec::new();
    for t in 0..THREADS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let log = Arc::clone(&log);
        appliers.push(thread::spawn(move || -> Result<()> {
            let mut rng = ChaCha8Rng::seed_from_u64(0xFEED + t);
            barrier.wait();
            for tx in tx_ids(t) {
                let mut updater = store.apply(tx)?.expect("every id is fresh");
                let mut deltas = Vec::new();
                for _ in 0..rng.gen_range(1..4) {
                    let label = rng.gen_range(0..LABELS);
                    let delta = rng.gen_range(1..5);
                    updater.increment_node_count(LabelId(label), delta)?;
                    deltas.push((label, delta));
                }
                updater.close()?;
                log.lock().push((tx, deltas));
            }
            Ok(())
        }));
    }
    for handle in appliers {
        handle.join().expect("applier panicked")?;
    }
    done.store(true, Ordering::Release);
    let images = checkpointer.join().expect("checkpointer panicked")?;
    assert!(!images.is_empty());

    let last = TxId(1 + THREADS * TXS_PER_THREAD);
    let mut live = BTreeMap::new();
    for label in 0..LABELS {
        live.insert(label, store.node_count(LabelId(label))?);
    }
    let log = log.lock().clone();
    assert_eq!(log.len() as u64, THREADS * TXS_PER_THREAD);

    for image in &images {
        let recovered = CountsStore::open(image, Box::new(EMPTY_REBUILD), &opts)?;
        assert_eq!(recovered.state(), StoreState::Ready);
        recovered.start()?;
        assert!(recovered.tx_id() <= last);
        for (tx, deltas) in &log {
            if let Some(mut updater) = recovered.apply(*tx)? {
                for &(label, delta) in deltas {
                    updater.increment_node_count(LabelId(label), delta)?;
                }
                updater.close()?;
            }
        }
        assert_eq!(recovered.tx_id(), last, "{}", image.display());
        for (&label, &count) in &live {
            assert_eq!(
                recovered.node_count(LabelId(label))?,
                count,
                "label {label} in {}",
                image.display()
            );
        }
        recovered.close()?;
    }
    Ok(())
}

#[test]
fn readers_see_monotonic_totals_during_checkpoints() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(CountsStore::open(
        dir.path().join("counts.db"),
        Box::new(EMPTY_REBUILD),
        &CountsStoreOptions::new("monotonic"),
    )?);
    store.start()?;
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<()> {
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let now = store.node_count(LabelId::ANY)?;
                assert!(now >= last, "count went backwards: {now} < {last}");
                last = now;
            }
            Ok(())
        })
    };

    for tx in 2..500u64 {
        let mut updater = store.apply(TxId(tx))?.expect("updater");
        updater.increment_node_count(LabelId::ANY, 1)?;
        updater.close()?;
        if tx % 37 == 0 {
            store.checkpoint(&Unlimited)?;
        }
    }
    done.store(true, Ordering::Release);
    reader.join().expect("reader panicked")?;
    assert_eq!(store.node_count(LabelId::ANY)?, 498);
    Ok(())
}
