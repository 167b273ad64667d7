//! On-disk image of an [`super::OrderedTree`].
//!
//! The file is a fixed header, an optional header payload owned by the tree's user, and the
//! sorted entries as fixed-size `key || value` records. The whole image is covered by a CRC32
//! seeded with the file salt.

use std::convert::TryInto;
use std::ops::Range;

use crate::types::{file_crc32, Result, SombraError};

pub(crate) const FILE_MAGIC: [u8; 4] = *b"SCNT";
pub(crate) const FILE_FORMAT_VERSION: u16 = 1;
pub(crate) const FILE_HDR_LEN: usize = 56;

const MAGIC: Range<usize> = 0..4;
const FORMAT_VERSION: Range<usize> = 4..6;
const FLAGS: Range<usize> = 6..8;
const LAYOUT_ID: Range<usize> = 8..16;
const KEY_SIZE: Range<usize> = 16..18;
const VALUE_SIZE: Range<usize> = 18..20;
const RESERVED: Range<usize> = 20..24;
const SALT: Range<usize> = 24..32;
const GENERATION: Range<usize> = 32..40;
const ENTRY_COUNT: Range<usize> = 40..48;
const PAYLOAD_LEN: Range<usize> = 48..52;
const CRC32: Range<usize> = 52..56;

const FLAG_HAS_HEADER: u16 = 0x0001;

/// Shape every image of one tree shares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ImageShape {
    pub layout_id: u64,
    pub key_size: usize,
    pub value_size: usize,
}

impl ImageShape {
    fn record_len(&self) -> usize {
        self.key_size + self.value_size
    }
}

/// Decoded file contents.
#[derive(Debug)]
pub(crate) struct TreeImage {
    pub salt: u64,
    pub generation: u64,
    pub header: Option<Vec<u8>>,
    pub entries: Vec<(Box<[u8]>, Box<[u8]>)>,
}

/// Serializes an image. `entries` must already be in ascending key order.
pub(crate) fn encode_image<'a, I>(
    shape: ImageShape,
    salt: u64,
    generation: u64,
    header: Option<&[u8]>,
    entry_count: usize,
    entries: I,
) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let payload = header.unwrap_or(&[]);
    let payload_len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| SombraError::Invalid("header payload too large"))?;
    let key_size: u16 = shape
        .key_size
        .try_into()
        .map_err(|_| SombraError::Invalid("key size too large"))?;
    let value_size: u16 = shape
        .value_size
        .try_into()
        .map_err(|_| SombraError::Invalid("value size too large"))?;
    let body_len = entry_count
        .checked_mul(shape.record_len())
        .ok_or(SombraError::Invalid("tree image too large"))?;
    let mut buf = Vec::with_capacity(FILE_HDR_LEN + payload.len() + body_len);
    buf.resize(FILE_HDR_LEN, 0);
    buf[MAGIC].copy_from_slice(&FILE_MAGIC);
    buf[FORMAT_VERSION].copy_from_slice(&FILE_FORMAT_VERSION.to_be_bytes());
    let flags = if header.is_some() { FLAG_HAS_HEADER } else { 0 };
    buf[FLAGS].copy_from_slice(&flags.to_be_bytes());
    buf[LAYOUT_ID].copy_from_slice(&shape.layout_id.to_be_bytes());
    buf[KEY_SIZE].copy_from_slice(&key_size.to_be_bytes());
    buf[VALUE_SIZE].copy_from_slice(&value_size.to_be_bytes());
    buf[RESERVED].fill(0);
    buf[SALT].copy_from_slice(&salt.to_be_bytes());
    buf[GENERATION].copy_from_slice(&generation.to_be_bytes());
    buf[ENTRY_COUNT].copy_from_slice(&(entry_count as u64).to_be_bytes());
    buf[PAYLOAD_LEN].copy_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(payload);
    let mut written = 0usize;
    for (key, value) in entries {
        if key.len() != shape.key_size || value.len() != shape.value_size {
            return Err(SombraError::Invalid("entry does not match tree layout"));
        }
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        written += 1;
    }
    if written != entry_count {
        return Err(SombraError::Invalid("entry count changed while encoding"));
    }
    let crc = file_crc32(salt, &buf);
    buf[CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

/// Verifies an image and returns only its header payload.
pub(crate) fn decode_header(bytes: &[u8], shape: ImageShape) -> Result<Option<Vec<u8>>> {
    decode_image(bytes, shape).map(|image| image.header)
}

/// Parses and verifies an image.
pub(crate) fn decode_image(bytes: &[u8], shape: ImageShape) -> Result<TreeImage> {
    if bytes.len() < FILE_HDR_LEN {
        return Err(SombraError::Corruption("tree file truncated"));
    }
    let magic: [u8; 4] = bytes[MAGIC].try_into().unwrap_or_default();
    if magic != FILE_MAGIC {
        return Err(SombraError::Corruption("invalid tree file magic"));
    }
    if read_u16(bytes, FORMAT_VERSION) != FILE_FORMAT_VERSION {
        return Err(SombraError::Corruption("unsupported tree file format version"));
    }
    if bytes[RESERVED].iter().any(|&b| b != 0) {
        return Err(SombraError::Corruption("tree file reserved bytes not zero"));
    }
    let salt = read_u64(bytes, SALT);
    let stored_crc = read_u32(bytes, CRC32);
    let mut scratch = bytes.to_vec();
    scratch[CRC32].fill(0);
    if file_crc32(salt, &scratch) != stored_crc {
        return Err(SombraError::Corruption("tree file checksum mismatch"));
    }
    if read_u64(bytes, LAYOUT_ID) != shape.layout_id {
        return Err(SombraError::Corruption("tree file written by another layout"));
    }
    if read_u16(bytes, KEY_SIZE) as usize != shape.key_size
        || read_u16(bytes, VALUE_SIZE) as usize != shape.value_size
    {
        return Err(SombraError::Corruption("tree file entry size mismatch"));
    }
    let flags = read_u16(bytes, FLAGS);
    let generation = read_u64(bytes, GENERATION);
    let entry_count = read_u64(bytes, ENTRY_COUNT) as usize;
    let payload_len = read_u32(bytes, PAYLOAD_LEN) as usize;
    let payload_end = FILE_HDR_LEN
        .checked_add(payload_len)
        .ok_or(SombraError::Corruption("tree file payload length overflow"))?;
    let expected_len = entry_count
        .checked_mul(shape.record_len())
        .and_then(|body| body.checked_add(payload_end))
        .ok_or(SombraError::Corruption("tree file entry count overflow"))?;
    if bytes.len() != expected_len {
        return Err(SombraError::Corruption("tree file length mismatch"));
    }
    let header = if flags & FLAG_HAS_HEADER != 0 {
        Some(bytes[FILE_HDR_LEN..payload_end].to_vec())
    } else {
        None
    };
    let mut entries = Vec::with_capacity(entry_count);
    let mut prev: Option<&[u8]> = None;
    for record in bytes[payload_end..].chunks_exact(shape.record_len()) {
        let (key, value) = record.split_at(shape.key_size);
        if let Some(prev) = prev {
            if prev >= key {
                return Err(SombraError::Corruption("tree file keys out of order"));
            }
        }
        prev = Some(key);
        entries.push((Box::from(key), Box::from(value)));
    }
    Ok(TreeImage {
        salt,
        generation,
        header,
        entries,
    })
}

fn read_u16(bytes: &[u8], range: Range<usize>) -> u16 {
    u16::from_be_bytes(bytes[range].try_into().unwrap_or_default())
}

fn read_u32(bytes: &[u8], range: Range<usize>) -> u32 {
    u32::from_be_bytes(bytes[range].try_into().unwrap_or_default())
}

fn read_u64(bytes: &[u8], range: Range<usize>) -> u64 {
    u64::from_be_bytes(bytes[range].try_into().unwrap_or_default())
}
