//! Counts storage for the graph engine.
//!
//! Keeps aggregate node, relationship and degree counts in ordered tree files, updated
//! transactionally and checkpointed alongside the primary store.

/// Generic transactional counts store.
///
/// Key encoding, change tracking, write strategies and the apply/checkpoint protocol.
pub mod counts;

/// Node and relationship counts, relationship group degrees, and their rebuilds.
pub mod graph;

pub use counts::{CountsStoreOptions, GenericCountsStore, StoreState};
pub use graph::{
    CountsStore, DegreesStore, DisabledDegreesStore, GraphStoreScan, MemoryGraph,
    RelationshipGroupDegreesStore,
};
