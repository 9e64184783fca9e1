//! # Checksums and Compression
//!
//! All integrity checks in the engine are CRC-32 based:
//!
//! - **Plain**: CRC over the full byte range.
//! - **Masked**: for encrypted load kinds the first `N` bytes are XOR-ed with
//!   the little-endian bytes of the recorded hash before hashing, where `N` is
//!   [`QUICK_ENCRYPT_LENGTH`] for quick-decrypt kinds and the declared length
//!   for full-decrypt kinds.
//!
//! Compressed payloads are gzip streams; their checksum is always plain.

use crate::constants::QUICK_ENCRYPT_LENGTH;
use crate::error::{Error, Result};
use crate::identifier::LoadKind;
use crc32fast::Hasher;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Computes the plain CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// XOR-s the first `mask_len` bytes of `data` with `code`, cycling the code.
///
/// The operation is its own inverse.
pub fn apply_mask(data: &mut [u8], code: [u8; 4], mask_len: usize) {
    let mask_len = mask_len.min(data.len());
    for (i, byte) in data[..mask_len].iter_mut().enumerate() {
        *byte ^= code[i % code.len()];
    }
}

/// Computes the CRC-32 of `data` with the first `mask_len` bytes XOR-ed by `code`.
pub fn masked_crc32(data: &[u8], code: [u8; 4], mask_len: usize) -> u32 {
    let mask_len = mask_len.min(data.len());
    let mut masked = data[..mask_len].to_vec();
    apply_mask(&mut masked, code, mask_len);

    let mut hasher = Hasher::new();
    hasher.update(&masked);
    hasher.update(&data[mask_len..]);
    hasher.finalize()
}

/// Length of the masked window for `kind`, given the declared length.
fn mask_window(kind: LoadKind, length: u64) -> usize {
    if kind.is_quick_encrypted() {
        QUICK_ENCRYPT_LENGTH
    } else if kind.is_fully_encrypted() {
        usize::try_from(length).unwrap_or(usize::MAX)
    } else {
        0
    }
}

/// Computes the checksum a manifest records for a resource of `kind`.
///
/// `recorded_hash` supplies the mask code for encrypted kinds; `length` is the
/// declared (decompressed) length.
pub fn resource_hash(data: &[u8], kind: LoadKind, recorded_hash: u32, length: u64) -> u32 {
    match mask_window(kind, length) {
        0 => crc32(data),
        window => masked_crc32(data, recorded_hash.to_le_bytes(), window),
    }
}

/// Produces the stored form of a plain payload and the hash a manifest records for it.
///
/// The hash is always the CRC of the plain bytes; encrypted kinds store the
/// payload with its masked window XOR-ed by that hash.
pub fn encode_resource(plain: &[u8], kind: LoadKind) -> (Vec<u8>, u32) {
    let hash = crc32(plain);
    let mut stored = plain.to_vec();
    let window = mask_window(kind, plain.len() as u64);
    apply_mask(&mut stored, hash.to_le_bytes(), window);
    (stored, hash)
}

/// Verifies length and load-kind checksum of decompressed resource bytes.
pub fn verify_resource(
    resource: &str,
    data: &[u8],
    kind: LoadKind,
    length: u64,
    hash: u32,
) -> Result<()> {
    check_length(resource, length, data.len() as u64)?;
    let actual = resource_hash(data, kind, hash, length);
    if actual != hash {
        return Err(Error::HashMismatch {
            resource: resource.to_string(),
            expected: hash,
            actual,
        });
    }
    Ok(())
}

/// Verifies length and plain checksum of compressed bytes.
pub fn verify_compressed(resource: &str, data: &[u8], length: u64, hash: u32) -> Result<()> {
    check_length(resource, length, data.len() as u64)?;
    let actual = crc32(data);
    if actual != hash {
        return Err(Error::HashMismatch {
            resource: resource.to_string(),
            expected: hash,
            actual,
        });
    }
    Ok(())
}

/// Returns a [`Error::LengthMismatch`] unless `actual == expected`.
pub fn check_length(resource: &str, expected: u64, actual: u64) -> Result<()> {
    if actual != expected {
        return Err(Error::LengthMismatch {
            resource: resource.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

// =============================================================================
// Compression
// =============================================================================

/// Gzip-compresses `data`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a gzip stream, bounded by `expected_len` plus one byte so a
/// compression bomb is reported as a length mismatch instead of exhausting memory.
pub fn decompress(resource: &str, data: &[u8], expected_len: u64) -> Result<Vec<u8>> {
    let decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(usize::try_from(expected_len).unwrap_or(0).min(64 << 20));
    decoder
        .take(expected_len.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::DecompressionFailed {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;
    check_length(resource, expected_len, out.len() as u64)?;
    Ok(out)
}
