//! Transactional counts and degrees stores for the Sombra graph engine.
//!
//! Transactions add deltas to node, relationship and relationship-group degree counts;
//! checkpoints write them durably together with the ids of the transactions they cover,
//! so recovery can replay exactly the missing ones.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;
