use std::cmp::Ordering;
use std::convert::TryInto;

use crate::primitives::tree::Layout;
use crate::types::{Result, SombraError};

use super::key::{CountsKey, KEY_SIZE};

/// Encoded value width.
pub const VALUE_SIZE: usize = 8;

/// Identifier persisted in every counts tree file ("cntsv001").
pub const COUNTS_LAYOUT_ID: u64 = u64::from_be_bytes(*b"cntsv001");

/// Signed count stored per key.
pub type CountsValue = i64;

/// Binds [`CountsKey`] and [`CountsValue`] to the ordered tree.
#[derive(Copy, Clone, Debug, Default)]
pub struct CountsLayout;

impl Layout for CountsLayout {
    type Key = CountsKey;
    type Value = CountsValue;

    fn identifier(&self) -> u64 {
        COUNTS_LAYOUT_ID
    }

    fn key_size(&self) -> usize {
        KEY_SIZE
    }

    fn value_size(&self) -> usize {
        VALUE_SIZE
    }

    fn encode_key(&self, key: &CountsKey, out: &mut [u8]) {
        key.encode_into(out);
    }

    fn decode_key(&self, src: &[u8]) -> Result<CountsKey> {
        CountsKey::decode(src)
    }

    fn encode_value(&self, value: &CountsValue, out: &mut [u8]) {
        out.copy_from_slice(&value.to_be_bytes());
    }

    fn decode_value(&self, src: &[u8]) -> Result<CountsValue> {
        let bytes: [u8; VALUE_SIZE] = src
            .try_into()
            .map_err(|_| SombraError::Corruption("counts value length mismatch"))?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn compare(&self, a: &CountsKey, b: &CountsKey) -> Ordering {
        a.cmp(b)
    }

    fn lowest(&self) -> CountsKey {
        CountsKey::LOWEST
    }

    fn highest(&self) -> CountsKey {
        CountsKey::HIGHEST
    }
}
