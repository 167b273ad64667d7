use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::types::TxId;

/// Transaction ids whose deltas are already reflected in the tree.
///
/// A transaction is applied iff its id is at most the highest gap-free id or it was
/// recorded as a stray (applied above a gap).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxIdInformation {
    highest_gap_free: u64,
    stray: BTreeSet<u64>,
}

impl TxIdInformation {
    /// Builds the information from a gap-free id and its strays.
    pub fn new(highest_gap_free: TxId, stray: impl IntoIterator<Item = TxId>) -> Self {
        Self {
            highest_gap_free: highest_gap_free.0,
            stray: stray.into_iter().map(|tx| tx.0).collect(),
        }
    }

    /// Highest id below which every transaction was applied.
    pub fn highest_gap_free(&self) -> TxId {
        TxId(self.highest_gap_free)
    }

    /// Ids applied above the gap-free boundary, ascending.
    pub fn stray_tx_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.stray.iter().map(|&tx| TxId(tx))
    }

    /// Number of stray ids.
    pub fn stray_count(&self) -> usize {
        self.stray.len()
    }

    /// Whether `tx` has already been applied.
    pub fn is_applied(&self, tx: TxId) -> bool {
        tx.0 <= self.highest_gap_free || self.stray.contains(&tx.0)
    }
}

/// Tracks closed transaction ids that may arrive out of order.
///
/// Ids directly above the gap-free boundary advance it, pulling in any consecutive ids
/// that arrived earlier. Ids handed to an open updater are reserved until offered.
#[derive(Debug, Default)]
pub struct OutOfOrderSequence {
    inner: Mutex<SequenceState>,
}

#[derive(Debug, Default)]
struct SequenceState {
    applied: TxIdInformation,
    reserved: BTreeSet<u64>,
}

impl OutOfOrderSequence {
    /// Starts from an existing state.
    pub fn new(initial: TxIdInformation) -> Self {
        Self {
            inner: Mutex::new(SequenceState {
                applied: initial,
                reserved: BTreeSet::new(),
            }),
        }
    }

    /// Claims `tx` for an open updater. Returns `false` if it was already applied or
    /// claimed.
    pub fn reserve(&self, tx: TxId) -> bool {
        let mut state = self.inner.lock();
        if state.applied.is_applied(tx) {
            return false;
        }
        state.reserved.insert(tx.0)
    }

    /// Records `tx` as applied, releasing its reservation. Returns `false` if it was
    /// already known.
    pub fn offer(&self, tx: TxId) -> bool {
        let mut state = self.inner.lock();
        state.reserved.remove(&tx.0);
        let applied = &mut state.applied;
        if applied.is_applied(tx) {
            return false;
        }
        if tx.0 == applied.highest_gap_free + 1 {
            applied.highest_gap_free = tx.0;
            loop {
                let next = applied.highest_gap_free + 1;
                if !applied.stray.remove(&next) {
                    break;
                }
                applied.highest_gap_free = next;
            }
        } else {
            applied.stray.insert(tx.0);
        }
        true
    }

    /// Current highest gap-free id.
    pub fn highest_gap_free(&self) -> TxId {
        self.inner.lock().applied.highest_gap_free()
    }

    /// Consistent copy of the applied ids; reservations are not included.
    pub fn snapshot(&self) -> TxIdInformation {
        self.inner.lock().applied.clone()
    }

    /// Resets to `highest_gap_free` with no strays and no reservations.
    pub fn set(&self, highest_gap_free: TxId) {
        let mut state = self.inner.lock();
        state.applied = TxIdInformation::new(highest_gap_free, []);
        state.reserved.clear();
    }
}
