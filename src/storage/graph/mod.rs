#![forbid(unsafe_code)]

//! Graph-facing counts: node and relationship counts, relationship group degrees, and the
//! scans that rebuild both from the primary store.

mod counts_store;
mod degrees_store;
pub mod rebuild;

pub use counts_store::{CountsStore, CountsUpdater, CountsVisitor};
pub use degrees_store::{
    DegreeUpdater, DegreesStore, DisabledDegreesStore, RelationshipGroupDegreesStore,
};
pub use rebuild::{
    CountsRebuilder, DegreesRebuilder, GraphStoreScan, LabelSet, MemoryGraph, NodeRecord,
    RelationshipGroupRecord, RelationshipRecord,
};
