#![forbid(unsafe_code)]

//! Transactional counts store: keys, values and the apply/checkpoint/rebuild protocol
//! layered on the ordered tree.

/// Fixed-size key encoding.
pub mod key;

/// Tree layout binding for counts keys and values.
pub mod layout;

mod changes;
mod header;
mod metrics;
mod options;
mod store;
mod txid;
mod writer;

pub use changes::CountsChanges;
pub use header::{CountsHeader, CountsHeaderReader, NEEDS_REBUILDING_HIGH_ID};
pub use key::{CountsKey, CountsKeyKind, KEY_SIZE};
pub use layout::{CountsLayout, CountsValue, COUNTS_LAYOUT_ID, VALUE_SIZE};
pub use metrics::{default_counts_metrics, CounterCountsMetrics, CountsMetrics, NoopCountsMetrics};
pub use options::{CountsStoreOptions, CACHE_CHECK_INTERVAL, DEFAULT_MAX_CACHE_SIZE};
pub use store::{
    ConsistencyReport, CountVisitor, EmptyRebuild, GenericCountsStore, Rebuilder, StoreState,
    EMPTY_REBUILD,
};
pub use txid::{OutOfOrderSequence, TxIdInformation};
pub use writer::{CountUpdater, CountWriter, MapWriter, TreeWriter, WriteMode};
