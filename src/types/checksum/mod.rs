#![forbid(unsafe_code)]

/// CRC32 over a persisted file image, seeded with the file's random salt.
///
/// The caller zeroes the checksum field before hashing so the value can live inside the
/// hashed region.
pub fn file_crc32(salt: u64, image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&salt.to_be_bytes());
    hasher.update(image);
    hasher.finalize()
}
