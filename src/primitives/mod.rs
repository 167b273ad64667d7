//! Low-level primitives the counts stores are built on.

/// Ordered, fixed-layout key/value tree persisted through atomic checkpoints.
///
/// Provides seeks over an inclusive key range, a single-writer handle with merge
/// semantics, and header payloads carried with every checkpoint.
pub mod tree;
