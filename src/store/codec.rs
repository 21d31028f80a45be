//! Page codec: slot/byte conversion and optional compression.
//!
//! Compressed pages are stored as a 12-byte prefix (4-byte marker,
//! uncompressed byte size, compressed byte size) followed by an lz4
//! block. Stored lengths live in the footer; page offsets stop being
//! computable once any page is compressed.

use crate::endian::Endianness;
use crate::error::{Result, StoreError};
use crate::record::SLOT_BYTES;

/// Marker prefix of a compressed page.
pub const COMPRESSED_MAGIC: [u8; 4] = *b"TKCZ";
const PREFIX_SIZE: usize = 12;

/// Serialize slots in the file's byte order.
pub fn slots_to_bytes(slots: &[u64], endian: Endianness) -> Vec<u8> {
    let mut out = Vec::with_capacity(slots.len() * SLOT_BYTES);
    for &s in slots {
        out.extend_from_slice(&endian.write_u64(s));
    }
    out
}

/// Parse a slot run from the file's byte order.
pub fn bytes_to_slots(bytes: &[u8], endian: Endianness) -> Result<Vec<u64>> {
    if bytes.len() % SLOT_BYTES != 0 {
        return Err(StoreError::InvalidFormat(format!(
            "page byte length {} is not a slot multiple",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(SLOT_BYTES)
        .map(|c| endian.read_u64(c.try_into().expect("chunk size")))
        .collect())
}

/// Whether the stored bytes carry the compressed-page prefix.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0..4] == COMPRESSED_MAGIC
}

/// Compress a page's slots for storage.
pub fn compress_page(slots: &[u64], endian: Endianness) -> Result<Vec<u8>> {
    let raw = slots_to_bytes(slots, endian);
    let block = lz4::block::compress(&raw, None, false)?;
    let mut out = Vec::with_capacity(PREFIX_SIZE + block.len());
    out.extend_from_slice(&COMPRESSED_MAGIC);
    out.extend_from_slice(&endian.write_u32(raw.len() as u32));
    out.extend_from_slice(&endian.write_u32(block.len() as u32));
    out.extend_from_slice(&block);
    Ok(out)
}

/// Decompress a stored page back to its slots.
pub fn decompress_page(bytes: &[u8], endian: Endianness) -> Result<Vec<u64>> {
    if !is_compressed(bytes) {
        return Err(StoreError::InvalidFormat(
            "page lacks compression marker".into(),
        ));
    }
    if bytes.len() < PREFIX_SIZE {
        return Err(StoreError::InvalidFormat(format!(
            "compressed page truncated at {} bytes",
            bytes.len()
        )));
    }
    let raw_len = endian.read_u32(bytes[4..8].try_into().expect("length checked")) as usize;
    let block_len = endian.read_u32(bytes[8..12].try_into().expect("length checked")) as usize;
    if bytes.len() < PREFIX_SIZE + block_len {
        return Err(StoreError::InvalidFormat(format!(
            "compressed page block truncated: {} of {} bytes",
            bytes.len() - PREFIX_SIZE,
            block_len
        )));
    }
    let raw = lz4::block::decompress(
        &bytes[PREFIX_SIZE..PREFIX_SIZE + block_len],
        Some(raw_len as i32),
    )?;
    if raw.len() != raw_len {
        return Err(StoreError::InvalidFormat(format!(
            "compressed page inflated to {} bytes, expected {}",
            raw.len(),
            raw_len
        )));
    }
    bytes_to_slots(&raw, endian)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FREE_SLOT;

    #[test]
    fn test_slot_byte_conversion() {
        let slots = vec![0u64, 1, u64::MAX, 0x0102_0304_0506_0708];
        for endian in [Endianness::Little, Endianness::Big] {
            let bytes = slots_to_bytes(&slots, endian);
            assert_eq!(bytes.len(), 32);
            assert_eq!(bytes_to_slots(&bytes, endian).unwrap(), slots);
        }
    }

    #[test]
    fn test_bytes_to_slots_rejects_partial_slot() {
        assert!(bytes_to_slots(&[0u8; 12], Endianness::Little).is_err());
    }

    #[test]
    fn test_compress_roundtrip() {
        // A mostly-free page compresses well and round-trips exactly.
        let mut slots = vec![FREE_SLOT; 512];
        for (i, s) in slots.iter_mut().take(40).enumerate() {
            *s = (i as u64) << 32 | 0b01_0011;
        }
        for endian in [Endianness::Little, Endianness::Big] {
            let stored = compress_page(&slots, endian).unwrap();
            assert!(is_compressed(&stored));
            assert!(stored.len() < slots.len() * SLOT_BYTES);
            assert_eq!(decompress_page(&stored, endian).unwrap(), slots);
        }
    }

    #[test]
    fn test_decompress_rejects_plain_page() {
        let slots = vec![1u64, 2, 3];
        let plain = slots_to_bytes(&slots, Endianness::Little);
        assert!(!is_compressed(&plain));
        assert!(decompress_page(&plain, Endianness::Little).is_err());
    }

    #[test]
    fn test_decompress_truncated() {
        let stored = compress_page(&[1, 2, 3, 4], Endianness::Little).unwrap();
        for cut in [2, 8, stored.len() - 1] {
            assert!(decompress_page(&stored[..cut], Endianness::Little).is_err());
        }
    }
}
