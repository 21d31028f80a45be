//! Byte-order tagging for the on-disk format.
//!
//! A file records its byte order with a two-character marker (`II` for
//! little-endian, `MM` for big-endian). Files with no marker are
//! tolerated as the older format and treated as little-endian.

/// Byte order of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Marker bytes for little-endian files.
pub const MARKER_LITTLE: [u8; 2] = *b"II";
/// Marker bytes for big-endian files.
pub const MARKER_BIG: [u8; 2] = *b"MM";

impl Endianness {
    /// Byte order of the running machine.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    /// Parse the two-byte marker; None for anything else.
    pub fn from_marker(marker: [u8; 2]) -> Option<Self> {
        match marker {
            MARKER_LITTLE => Some(Endianness::Little),
            MARKER_BIG => Some(Endianness::Big),
            _ => None,
        }
    }

    pub fn marker(self) -> [u8; 2] {
        match self {
            Endianness::Little => MARKER_LITTLE,
            Endianness::Big => MARKER_BIG,
        }
    }

    /// Whether values read from a file with this byte order need a
    /// swap on the running machine.
    pub fn needs_swap(self) -> bool {
        self != Endianness::native()
    }

    pub fn write_u16(self, v: u16) -> [u8; 2] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    pub fn write_u32(self, v: u32) -> [u8; 4] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    pub fn write_u64(self, v: u64) -> [u8; 8] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    pub fn write_i32(self, v: i32) -> [u8; 4] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    pub fn read_u16(self, b: [u8; 2]) -> u16 {
        match self {
            Endianness::Little => u16::from_le_bytes(b),
            Endianness::Big => u16::from_be_bytes(b),
        }
    }

    pub fn read_u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endianness::Little => u32::from_le_bytes(b),
            Endianness::Big => u32::from_be_bytes(b),
        }
    }

    pub fn read_u64(self, b: [u8; 8]) -> u64 {
        match self {
            Endianness::Little => u64::from_le_bytes(b),
            Endianness::Big => u64::from_be_bytes(b),
        }
    }

    pub fn read_i32(self, b: [u8; 4]) -> i32 {
        match self {
            Endianness::Little => i32::from_le_bytes(b),
            Endianness::Big => i32::from_be_bytes(b),
        }
    }
}
