use std::convert::TryInto;

use crate::primitives::tree::HeaderReader;
use crate::types::{Result, SombraError, TxId};

/// Header payload width: the highest gap-free transaction id.
pub const HEADER_SIZE: usize = 8;

/// Highest gap-free id value marking a store that must be rebuilt.
pub const NEEDS_REBUILDING_HIGH_ID: u64 = 0;

/// Payload checkpointed with every counts tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CountsHeader {
    /// Every transaction up to and including this id is reflected in the tree.
    pub highest_gap_free_tx_id: TxId,
}

impl CountsHeader {
    /// Serialized payload.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.highest_gap_free_tx_id.0.to_be_bytes()
    }

    /// Parses a payload produced by [`CountsHeader::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let bytes: [u8; HEADER_SIZE] = payload
            .try_into()
            .map_err(|_| SombraError::Corruption("counts header payload length mismatch"))?;
        Ok(Self {
            highest_gap_free_tx_id: TxId(u64::from_be_bytes(bytes)),
        })
    }

    /// Whether the stored id signals that counts must be rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        self.highest_gap_free_tx_id.0 == NEEDS_REBUILDING_HIGH_ID
    }
}

/// [`HeaderReader`] remembering whether a header was present at all.
#[derive(Debug, Default)]
pub struct CountsHeaderReader {
    header: Option<CountsHeader>,
}

impl CountsHeaderReader {
    /// Whether the file carried a header.
    pub fn was_read(&self) -> bool {
        self.header.is_some()
    }

    /// Highest gap-free id read, or [`NEEDS_REBUILDING_HIGH_ID`] when absent.
    pub fn highest_gap_free_tx_id(&self) -> TxId {
        self.header
            .map(|h| h.highest_gap_free_tx_id)
            .unwrap_or(TxId(NEEDS_REBUILDING_HIGH_ID))
    }

    /// Absent header or a zero id both require a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.header.map_or(true, |h| h.needs_rebuild())
    }
}

impl HeaderReader for CountsHeaderReader {
    fn read(&mut self, payload: &[u8]) -> Result<()> {
        self.header = Some(CountsHeader::decode(payload)?);
        Ok(())
    }
}
