use std::convert::TryInto;
use std::fmt;
use std::ops::Range;

use crate::types::{GroupId, LabelId, RelationshipDirection, Result, SombraError, TxId, TypeId};

/// Encoded key width: type byte, 8-byte `first`, 4-byte `second`.
pub const KEY_SIZE: usize = 13;

const TYPE: usize = 0;
const FIRST: Range<usize> = 1..9;
const SECOND: Range<usize> = 9..13;

/// Marks a transaction id applied out of order at the last checkpoint.
pub const TYPE_STRAY_TX_ID: u8 = 0;
/// Number of nodes carrying a label.
pub const TYPE_NODE: u8 = 1;
/// Number of relationships matching a (start label, type, end label) triple.
pub const TYPE_RELATIONSHIP: u8 = 2;
/// Directional degree of a relationship group.
pub const TYPE_DEGREE: u8 = 3;

/// Fixed-size key of the counts and degrees stores.
///
/// Field order makes the derived `Ord` equal to the order of the unsigned big-endian
/// encoding, so sorting keys in memory and in the tree agree.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct CountsKey {
    key_type: u8,
    first: u64,
    second: u32,
}

/// Typed view of a [`CountsKey`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CountsKeyKind {
    /// Node count for a label (or [`LabelId::ANY`]).
    Node {
        /// Counted label.
        label: LabelId,
    },
    /// Relationship count for a triple; any part may be a wildcard.
    Relationship {
        /// Label of the start node.
        start: LabelId,
        /// Relationship type.
        ty: TypeId,
        /// Label of the end node.
        end: LabelId,
    },
    /// Degree of one direction of a relationship group.
    Degree {
        /// Relationship group.
        group: GroupId,
        /// Chain direction.
        direction: RelationshipDirection,
    },
    /// Checkpoint bookkeeping marker.
    StrayTxId {
        /// Transaction applied out of order.
        tx: TxId,
    },
}

impl CountsKey {
    /// Ordered before every real key.
    pub const LOWEST: CountsKey = CountsKey {
        key_type: u8::MIN,
        first: u64::MIN,
        second: u32::MIN,
    };

    /// Ordered after every real key.
    pub const HIGHEST: CountsKey = CountsKey {
        key_type: u8::MAX,
        first: u64::MAX,
        second: u32::MAX,
    };

    /// First key of the count range; stray markers sort before it.
    pub const MIN_COUNT: CountsKey = CountsKey {
        key_type: TYPE_NODE,
        first: u64::MIN,
        second: u32::MIN,
    };

    /// Last key of the count range.
    pub const MAX_COUNT: CountsKey = CountsKey {
        key_type: u8::MAX,
        first: u64::MAX,
        second: u32::MAX,
    };

    /// First stray marker key.
    pub const MIN_STRAY_TX_ID: CountsKey = CountsKey {
        key_type: TYPE_STRAY_TX_ID,
        first: u64::MIN,
        second: u32::MIN,
    };

    /// Last stray marker key.
    pub const MAX_STRAY_TX_ID: CountsKey = CountsKey {
        key_type: TYPE_STRAY_TX_ID,
        first: u64::MAX,
        second: u32::MAX,
    };

    /// Builds a key from raw parts.
    pub const fn from_parts(key_type: u8, first: u64, second: u32) -> Self {
        Self {
            key_type,
            first,
            second,
        }
    }

    /// Number of nodes with `label`.
    pub fn node(label: LabelId) -> Self {
        Self::from_parts(TYPE_NODE, u64::from(label.0), 0)
    }

    /// Number of relationships `(start)-[ty]->(end)`.
    pub fn relationship(start: LabelId, ty: TypeId, end: LabelId) -> Self {
        let first = (u64::from(start.0) << 32) | u64::from(ty.0);
        Self::from_parts(TYPE_RELATIONSHIP, first, end.0)
    }

    /// Highest group id a degree key can hold.
    pub const MAX_GROUP_ID: u64 = (1 << 62) - 1;

    /// Degree of `group` in `direction`. Group ids use the low 62 bits; larger ids alias,
    /// so callers taking ids from outside go through [`CountsKey::try_degree`].
    pub fn degree(group: GroupId, direction: RelationshipDirection) -> Self {
        debug_assert!(group.0 <= Self::MAX_GROUP_ID, "group id {} exceeds 62 bits", group.0);
        Self::from_parts(TYPE_DEGREE, (group.0 << 2) | direction.ordinal(), 0)
    }

    /// Like [`CountsKey::degree`], rejecting group ids above [`CountsKey::MAX_GROUP_ID`].
    pub fn try_degree(group: GroupId, direction: RelationshipDirection) -> Result<Self> {
        if group.0 > Self::MAX_GROUP_ID {
            return Err(SombraError::Invalid("group id exceeds 62 bits"));
        }
        Ok(Self::degree(group, direction))
    }

    /// Marker recording that `tx` was applied out of order.
    pub fn stray_tx_id(tx: TxId) -> Self {
        Self::from_parts(TYPE_STRAY_TX_ID, tx.0, 0)
    }

    /// Raw type discriminator.
    pub fn key_type(&self) -> u8 {
        self.key_type
    }

    /// Raw `first` field.
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Raw `second` field.
    pub fn second(&self) -> u32 {
        self.second
    }

    /// Whether this key carries a count (as opposed to a stray marker or sentinel).
    pub fn is_count(&self) -> bool {
        matches!(self.key_type, TYPE_NODE | TYPE_RELATIONSHIP | TYPE_DEGREE)
    }

    /// Typed view; `None` for sentinels and unknown discriminators.
    pub fn kind(&self) -> Option<CountsKeyKind> {
        match self.key_type {
            TYPE_NODE => Some(CountsKeyKind::Node {
                label: LabelId(self.first as u32),
            }),
            TYPE_RELATIONSHIP => Some(CountsKeyKind::Relationship {
                start: LabelId((self.first >> 32) as u32),
                ty: TypeId(self.first as u32),
                end: LabelId(self.second),
            }),
            TYPE_DEGREE => RelationshipDirection::from_ordinal(self.first & 0b11).map(
                |direction| CountsKeyKind::Degree {
                    group: GroupId(self.first >> 2),
                    direction,
                },
            ),
            TYPE_STRAY_TX_ID => Some(CountsKeyKind::StrayTxId {
                tx: TxId(self.first),
            }),
            _ => None,
        }
    }

    /// Writes the big-endian encoding into `out` (exactly [`KEY_SIZE`] bytes).
    pub fn encode_into(&self, out: &mut [u8]) {
        out[TYPE] = self.key_type;
        out[FIRST].copy_from_slice(&self.first.to_be_bytes());
        out[SECOND].copy_from_slice(&self.second.to_be_bytes());
    }

    /// Big-endian encoding.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        let mut buf = [0u8; KEY_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a key from exactly [`KEY_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(SombraError::Corruption("counts key length mismatch"));
        }
        let first = bytes[FIRST]
            .try_into()
            .map_err(|_| SombraError::Corruption("counts key first field"))?;
        let second = bytes[SECOND]
            .try_into()
            .map_err(|_| SombraError::Corruption("counts key second field"))?;
        Ok(Self::from_parts(
            bytes[TYPE],
            u64::from_be_bytes(first),
            u32::from_be_bytes(second),
        ))
    }
}

impl fmt::Display for CountsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(CountsKeyKind::Node { label }) => write!(f, "Node[({label})]"),
            Some(CountsKeyKind::Relationship { start, ty, end }) => {
                write!(f, "Relationship[({start})-[{ty}]->({end})]")
            }
            Some(CountsKeyKind::Degree { group, direction }) => {
                write!(f, "Degree[group:{group}, {direction}]")
            }
            Some(CountsKeyKind::StrayTxId { tx }) => write!(f, "StrayTxId[{tx}]"),
            None => write!(
                f,
                "Key[type:{}, first:{}, second:{}]",
                self.key_type, self.first, self.second
            ),
        }
    }
}

impl From<CountsKeyKind> for CountsKey {
    fn from(kind: CountsKeyKind) -> Self {
        match kind {
            CountsKeyKind::Node { label } => CountsKey::node(label),
            CountsKeyKind::Relationship { start, ty, end } => {
                CountsKey::relationship(start, ty, end)
            }
            CountsKeyKind::Degree { group, direction } => CountsKey::degree(group, direction),
            CountsKeyKind::StrayTxId { tx } => CountsKey::stray_tx_id(tx),
        }
    }
}
