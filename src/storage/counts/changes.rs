use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{Result, SombraError};

use super::key::CountsKey;

/// In-memory totals accumulated since the last checkpoint.
///
/// Each accumulator holds the absolute count for its key: it is seeded on first touch from
/// the frozen predecessor or from the tree, and every later delta is an atomic add. A
/// checkpoint freezes the live instance with [`CountsChanges::freeze_and_fork`]; the fork
/// reads through to the frozen instance until [`CountsChanges::clear_previous_changes`]
/// drops the link after the frozen totals reached the tree.
#[derive(Default)]
pub struct CountsChanges {
    changes: RwLock<FxHashMap<CountsKey, Arc<AtomicI64>>>,
    frozen: AtomicBool,
    previous: RwLock<Option<Arc<CountsChanges>>>,
}

impl CountsChanges {
    /// Creates an empty, mutable instance with no predecessor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the total for `key`.
    ///
    /// On first touch the total starts from the predecessor's value if it holds the key,
    /// otherwise from `default_from_store`. Fails once the instance is frozen.
    pub fn add<F>(&self, key: CountsKey, delta: i64, default_from_store: F) -> Result<()>
    where
        F: FnOnce(&CountsKey) -> Result<i64>,
    {
        if self.is_frozen() {
            return Err(SombraError::Invalid("counts changes are frozen"));
        }
        let existing = self.changes.read().get(&key).cloned();
        let counter = match existing {
            Some(counter) => counter,
            None => {
                let initial = match self.previous_value(&key) {
                    Some(value) => value,
                    None => default_from_store(&key)?,
                };
                // A racing thread may have seeded the same key; both computed the same
                // initial value, so whichever insert wins is correct.
                self.changes
                    .write()
                    .entry(key)
                    .or_insert_with(|| Arc::new(AtomicI64::new(initial)))
                    .clone()
            }
        };
        counter.fetch_add(delta, Ordering::AcqRel);
        Ok(())
    }

    /// Current total for `key`, looking through frozen predecessors; `None` when no
    /// instance in the chain holds it.
    pub fn get(&self, key: &CountsKey) -> Option<i64> {
        if let Some(counter) = self.changes.read().get(key) {
            return Some(counter.load(Ordering::Acquire));
        }
        self.previous_value(key)
    }

    /// Whether `key` has an in-memory total anywhere in the chain.
    pub fn contains_change(&self, key: &CountsKey) -> bool {
        self.changes.read().contains_key(key)
            || self
                .previous
                .read()
                .as_ref()
                .map_or(false, |prev| prev.contains_change(key))
    }

    /// Totals held by this instance alone, in key order.
    pub fn sorted_changes(&self) -> Vec<(CountsKey, i64)> {
        let mut sorted: Vec<(CountsKey, i64)> = self
            .changes
            .read()
            .iter()
            .map(|(key, counter)| (*key, counter.load(Ordering::Acquire)))
            .collect();
        sorted.sort_unstable_by_key(|(key, _)| *key);
        sorted
    }

    /// Totals visible through the whole chain in key order; newer instances win.
    pub fn visible_changes(&self) -> Vec<(CountsKey, i64)> {
        let mut merged: FxHashMap<CountsKey, i64> = match self.previous.read().as_ref() {
            Some(prev) => prev.visible_changes().into_iter().collect(),
            None => FxHashMap::default(),
        };
        for (key, counter) in self.changes.read().iter() {
            merged.insert(*key, counter.load(Ordering::Acquire));
        }
        let mut sorted: Vec<(CountsKey, i64)> = merged.into_iter().collect();
        sorted.sort_unstable_by_key(|(key, _)| *key);
        sorted
    }

    /// Number of keys held by this instance.
    pub fn len(&self) -> usize {
        self.changes.read().len()
    }

    /// Whether this instance holds no keys.
    pub fn is_empty(&self) -> bool {
        self.changes.read().is_empty()
    }

    /// Rejects every later [`CountsChanges::add`].
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether [`CountsChanges::freeze`] was called.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Freezes this instance and returns an empty successor reading through to it.
    pub fn freeze_and_fork(self: &Arc<Self>) -> Arc<CountsChanges> {
        self.freeze();
        Arc::new(CountsChanges {
            previous: RwLock::new(Some(Arc::clone(self))),
            ..CountsChanges::default()
        })
    }

    /// Drops the link to the frozen predecessor once its totals are in the tree.
    pub fn clear_previous_changes(&self) {
        self.previous.write().take();
    }

    /// Whether a frozen predecessor is still linked.
    pub fn has_previous(&self) -> bool {
        self.previous.read().is_some()
    }

    fn previous_value(&self, key: &CountsKey) -> Option<i64> {
        self.previous.read().as_ref().and_then(|prev| prev.get(key))
    }
}
