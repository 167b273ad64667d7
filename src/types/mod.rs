#![forbid(unsafe_code)]

//! Shared identifiers, error type and checksum helpers.

use std::fmt;
use std::path::PathBuf;

/// Checksum helpers used by persisted files.
pub mod checksum;

pub use checksum::file_crc32;

/// Node label identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);

/// Relationship type identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);

/// Relationship group record identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GroupId(pub u64);

/// Node record identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Relationship record identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelId(pub u64);

/// Committed transaction identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub u64);

impl LabelId {
    /// Wildcard label matching every node ("all nodes").
    pub const ANY: LabelId = LabelId(u32::MAX);
}

impl TypeId {
    /// Wildcard relationship type matching every relationship.
    pub const ANY: TypeId = TypeId(u32::MAX);
}

impl TxId {
    /// The id every database starts at before its first committed transaction.
    pub const BASE: TxId = TxId(1);
}

/// Direction of a relationship chain hanging off a relationship group.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum RelationshipDirection {
    /// Relationships starting at the group's owning node.
    Outgoing,
    /// Relationships ending at the group's owning node.
    Incoming,
    /// Relationships both starting and ending at the owning node.
    Loop,
}

impl RelationshipDirection {
    /// All directions in ordinal order.
    pub const ALL: [RelationshipDirection; 3] = [
        RelationshipDirection::Outgoing,
        RelationshipDirection::Incoming,
        RelationshipDirection::Loop,
    ];

    /// Stable ordinal used in the persisted degree key.
    pub const fn ordinal(self) -> u64 {
        match self {
            RelationshipDirection::Outgoing => 0,
            RelationshipDirection::Incoming => 1,
            RelationshipDirection::Loop => 2,
        }
    }

    /// Inverse of [`RelationshipDirection::ordinal`].
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(RelationshipDirection::Outgoing),
            1 => Some(RelationshipDirection::Incoming),
            2 => Some(RelationshipDirection::Loop),
            _ => None,
        }
    }
}

/// Errors produced by the counts stores and the ordered tree beneath them.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller violated an API precondition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// The tree file was written with a different layout or is unreadable.
    #[error("metadata mismatch in {path}: {reason}")]
    MetadataMismatch {
        /// File that failed to open.
        path: PathBuf,
        /// What did not match.
        reason: &'static str,
    },
    /// The tree file does not exist and cannot be created (read-only open).
    #[error("tree file not found: {0}")]
    TreeFileNotFound(PathBuf),
    /// A count would have become negative; indicates a double decrement or a missed increment.
    #[error("negative count {count} for key {key}")]
    NegativeCount {
        /// Rendered key.
        key: String,
        /// The offending resultant count.
        count: i64,
    },
    /// A persisted count value is invalid, typically caused by store corruption.
    #[error("invalid count {count} stored for key {key}")]
    InvalidCount {
        /// Rendered key.
        key: String,
        /// The stored value.
        count: i64,
    },
    /// The operation needs to write but the store was opened read-only.
    #[error("read-only: {0}")]
    ReadOnly(&'static str),
    /// A checkpoint or flush failed part way; the store refuses writes until reopened.
    #[error("store failed: {0}")]
    Failed(String),
    /// The operation is not supported by this store variant.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == LabelId::ANY {
            f.write_str("*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == TypeId::ANY {
            f.write_str("*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelationshipDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationshipDirection::Outgoing => "OUTGOING",
            RelationshipDirection::Incoming => "INCOMING",
            RelationshipDirection::Loop => "LOOP",
        })
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u64> for TxId {
    fn from(value: u64) -> Self {
        TxId(value)
    }
}
