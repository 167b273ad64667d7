use std::cmp::Ordering;
use std::fmt;

use crate::types::Result;

/// Binds a key and value type to the fixed-size binary representation stored by
/// [`super::OrderedTree`].
///
/// Implementations must keep [`Layout::compare`] consistent with a lexicographic comparison
/// of the encoded key bytes: the tree orders entries by their encoded form.
pub trait Layout: Send + Sync + 'static {
    /// Decoded key type.
    type Key: Clone + fmt::Debug + Send + Sync;
    /// Decoded value type.
    type Value: Clone + fmt::Debug + Send + Sync;

    /// Identifier persisted in the file header; a mismatch on open means the file was
    /// written by a different layout.
    fn identifier(&self) -> u64;

    /// Encoded key width in bytes.
    fn key_size(&self) -> usize;

    /// Encoded value width in bytes.
    fn value_size(&self) -> usize;

    /// Encode `key` into `out`, which is exactly [`Layout::key_size`] bytes.
    fn encode_key(&self, key: &Self::Key, out: &mut [u8]);

    /// Decode a key from exactly [`Layout::key_size`] bytes.
    fn decode_key(&self, src: &[u8]) -> Result<Self::Key>;

    /// Encode `value` into `out`, which is exactly [`Layout::value_size`] bytes.
    fn encode_value(&self, value: &Self::Value, out: &mut [u8]);

    /// Decode a value from exactly [`Layout::value_size`] bytes.
    fn decode_value(&self, src: &[u8]) -> Result<Self::Value>;

    /// Total order over keys.
    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    /// Key ordered before every other key; bounds full range scans.
    fn lowest(&self) -> Self::Key;

    /// Key ordered after every other key; bounds full range scans.
    fn highest(&self) -> Self::Key;

    /// Convenience wrapper returning the encoded key as an owned buffer.
    fn key_bytes(&self, key: &Self::Key) -> Box<[u8]> {
        let mut buf = vec![0u8; self.key_size()].into_boxed_slice();
        self.encode_key(key, &mut buf);
        buf
    }

    /// Convenience wrapper returning the encoded value as an owned buffer.
    fn value_bytes(&self, value: &Self::Value) -> Box<[u8]> {
        let mut buf = vec![0u8; self.value_size()].into_boxed_slice();
        self.encode_value(value, &mut buf);
        buf
    }
}
