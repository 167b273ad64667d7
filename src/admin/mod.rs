#![forbid(unsafe_code)]

//! Store administration: configuration loading, dumps and read-only verification.

mod dump;
mod error;
mod options;
mod verify;

/// Prints a store file without opening it for writes.
pub use dump::dump;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Store settings loaded from TOML.
pub use options::CountsConfig;

/// Store file verification.
///
/// Checks the tree structure and the value rules of every persisted entry.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
