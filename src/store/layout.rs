//! On-disk layout: file header, footer entries, page geometry.
//!
//! ## File layout
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic "TICK"
//! 4       4     version string "0200"
//! 8       2     endianness marker ("II" little, "MM" big)
//! 10      2     flag word
//! 12      2     symbol table serialization version
//! 14      2     reserved
//! 16      8     payload offset (first page's data)
//! 24      8     symbol table offset (0 = absent)
//! 32      8     footer offset (0 = absent)
//! 40      4     symbol table serialized size
//! 44      4     symbol count
//! 48      4     page size in bytes
//! 52      8     record count
//! 60      4     page count
//! 64..4096      zero padding
//! ```
//!
//! Pages are fixed-capacity runs of 8-byte slots. The first page's
//! usable region starts right after the header inside the same
//! page-aligned block; every later page occupies a full block. The
//! footer, when present, is an array of (offset, length, tick count)
//! triples locating pages that are not at computable offsets
//! (compressed or interval-sorted output).
//!
//! All multi-byte header fields are written in the byte order the
//! marker declares. A file with an unrecognized marker is tolerated as
//! the older unmarked little-endian format.

use crate::endian::Endianness;
use crate::error::{Result, StoreError};
use crate::record::SLOT_BYTES;

pub const MAGIC: [u8; 4] = *b"TICK";
pub const VERSION: [u8; 4] = *b"0200";
/// Oldest version this build still reads.
pub const VERSION_MIN: [u8; 4] = *b"0100";

pub const HEADER_SIZE: usize = 4096;
/// Default page size as a multiple of the system page.
pub const DEFAULT_PAGE_MULTIPLE: usize = 64;

/// System memory page size.
pub fn system_page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

/// Default page size in bytes.
pub fn default_page_bytes() -> usize {
    system_page_size() * DEFAULT_PAGE_MULTIPLE
}

// ── Flag word ──────────────────────────────────────────────────────

/// Header flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags(pub u16);

impl FileFlags {
    /// Serialized symbol table present after the pages.
    pub const SYMTAB: u16 = 1 << 0;
    /// Records are globally header-sorted.
    pub const ORDERED: u16 = 1 << 1;
    /// Footer with per-page range entries present.
    pub const RANGE_TABLE: u16 = 1 << 2;
    /// Pages are compressed; offsets only via the footer.
    pub const COMPRESSED: u16 = 1 << 3;
    /// File written in stream mode.
    pub const STREAM: u16 = 1 << 4;
    /// Writer session open or crashed; contents suspect.
    pub const DIRTY: u16 = 1 << 5;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn insert(&mut self, flag: u16) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u16) {
        self.0 &= !flag;
    }
}

// ── File header ────────────────────────────────────────────────────

/// Parsed/buildable file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: [u8; 4],
    pub endian: Endianness,
    pub flags: FileFlags,
    pub symtab_version: u16,
    pub payload_offset: u64,
    pub symtab_offset: u64,
    pub footer_offset: u64,
    pub symtab_size: u32,
    pub symbol_count: u32,
    pub page_bytes: u32,
    pub record_count: u64,
    pub page_count: u32,
    /// Parsed from a file without an endianness marker (old format).
    pub legacy_marker: bool,
}

impl FileHeader {
    /// Fresh header for a new file.
    pub fn new(endian: Endianness, page_bytes: u32) -> Self {
        Self {
            version: VERSION,
            endian,
            flags: FileFlags::default(),
            symtab_version: crate::symtab::SYMTAB_VERSION,
            payload_offset: HEADER_SIZE as u64,
            symtab_offset: 0,
            footer_offset: 0,
            symtab_size: 0,
            symbol_count: 0,
            page_bytes,
            record_count: 0,
            page_count: 0,
            legacy_marker: false,
        }
    }

    /// Serialize to a full header block.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let e = self.endian;
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.version);
        buf[8..10].copy_from_slice(&e.marker());
        buf[10..12].copy_from_slice(&e.write_u16(self.flags.0));
        buf[12..14].copy_from_slice(&e.write_u16(self.symtab_version));
        buf[16..24].copy_from_slice(&e.write_u64(self.payload_offset));
        buf[24..32].copy_from_slice(&e.write_u64(self.symtab_offset));
        buf[32..40].copy_from_slice(&e.write_u64(self.footer_offset));
        buf[40..44].copy_from_slice(&e.write_u32(self.symtab_size));
        buf[44..48].copy_from_slice(&e.write_u32(self.symbol_count));
        buf[48..52].copy_from_slice(&e.write_u32(self.page_bytes));
        buf[52..60].copy_from_slice(&e.write_u64(self.record_count));
        buf[60..64].copy_from_slice(&e.write_u32(self.page_count));
        buf
    }

    /// Parse a header block.
    ///
    /// An unrecognized endianness marker is tolerated as the older
    /// little-endian format and flagged via `legacy_marker`; a bad
    /// magic or a version newer than this build is fatal. Versions
    /// older than [`VERSION_MIN`] parse fine (the header block layout
    /// is stable); [`FileHeader::check_version`] decides whether they
    /// are accepted.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "file too short for header: {} bytes",
                buf.len()
            )));
        }
        if buf[0..4] != MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "bad magic {:02x?}",
                &buf[0..4]
            )));
        }
        let version: [u8; 4] = buf[4..8].try_into().expect("length checked");
        if version > VERSION {
            return Err(StoreError::VersionTooNew {
                found: String::from_utf8_lossy(&version).into_owned(),
                current: String::from_utf8_lossy(&VERSION).into_owned(),
            });
        }

        let marker: [u8; 2] = buf[8..10].try_into().expect("length checked");
        let (endian, legacy_marker) = match Endianness::from_marker(marker) {
            Some(e) => (e, false),
            None => {
                tracing::warn!(
                    ?marker,
                    "missing endianness marker, assuming old little-endian format"
                );
                (Endianness::Little, true)
            }
        };
        let e = endian;

        let read_u16 = |at: usize| e.read_u16(buf[at..at + 2].try_into().expect("length checked"));
        let read_u32 = |at: usize| e.read_u32(buf[at..at + 4].try_into().expect("length checked"));
        let read_u64 = |at: usize| e.read_u64(buf[at..at + 8].try_into().expect("length checked"));

        Ok(Self {
            version,
            endian,
            flags: FileFlags(read_u16(10)),
            symtab_version: read_u16(12),
            payload_offset: read_u64(16),
            symtab_offset: read_u64(24),
            footer_offset: read_u64(32),
            symtab_size: read_u32(40),
            symbol_count: read_u32(44),
            page_bytes: read_u32(48),
            record_count: read_u64(52),
            page_count: read_u32(60),
            legacy_marker,
        })
    }

    /// Reject versions below [`VERSION_MIN`]. The error is repairable:
    /// a tolerant open may accept the file and upgrade it on close.
    pub fn check_version(&self) -> Result<()> {
        if self.version < VERSION_MIN {
            return Err(StoreError::VersionTooOld {
                found: String::from_utf8_lossy(&self.version).into_owned(),
                oldest: String::from_utf8_lossy(&VERSION_MIN).into_owned(),
            });
        }
        Ok(())
    }
}

// ── Footer ─────────────────────────────────────────────────────────

pub const FOOTER_ENTRY_SIZE: usize = 16;

/// One footer triple locating a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    /// File offset of the page data.
    pub offset: u64,
    /// Stored length in bytes (smaller than the page size when
    /// compressed).
    pub length: u32,
    /// Records in the page.
    pub ticks: u32,
}

impl PageEntry {
    pub fn write_to<W: std::io::Write>(&self, w: &mut W, e: Endianness) -> Result<()> {
        w.write_all(&e.write_u64(self.offset))?;
        w.write_all(&e.write_u32(self.length))?;
        w.write_all(&e.write_u32(self.ticks))?;
        Ok(())
    }

    pub fn from_bytes(buf: &[u8], e: Endianness) -> Result<Self> {
        if buf.len() < FOOTER_ENTRY_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "footer entry truncated: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            offset: e.read_u64(buf[0..8].try_into().expect("length checked")),
            length: e.read_u32(buf[8..12].try_into().expect("length checked")),
            ticks: e.read_u32(buf[12..16].try_into().expect("length checked")),
        })
    }
}

// ── Page geometry ──────────────────────────────────────────────────

/// Computable page placement for uncompressed, unsorted files.
///
/// The header shares its page-aligned block with the first page, so
/// page 0 is usually short; later pages are full blocks at fixed
/// offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub payload_offset: u64,
    pub page_bytes: usize,
}

impl PageGeometry {
    pub fn new(payload_offset: u64, page_bytes: usize) -> Self {
        debug_assert!(page_bytes >= SLOT_BYTES);
        Self {
            payload_offset,
            page_bytes,
        }
    }

    /// Slot capacity of a full page.
    pub fn page_slots(&self) -> usize {
        self.page_bytes / SLOT_BYTES
    }

    /// Slot capacity of page `index` (page 0 is shortened by the
    /// header's share of its block).
    pub fn slots_of(&self, index: usize) -> usize {
        if index == 0 {
            let rem = (self.payload_offset % self.page_bytes as u64) as usize;
            if rem > 0 {
                (self.page_bytes - rem) / SLOT_BYTES
            } else {
                self.page_slots()
            }
        } else {
            self.page_slots()
        }
    }

    /// File offset of page `index`'s data.
    pub fn data_offset(&self, index: usize) -> u64 {
        if index == 0 {
            self.payload_offset
        } else {
            self.payload_offset
                + (self.slots_of(0) * SLOT_BYTES) as u64
                + ((index - 1) * self.page_bytes) as u64
        }
    }

    /// Byte length of page `index` on disk.
    pub fn byte_len(&self, index: usize) -> usize {
        self.slots_of(index) * SLOT_BYTES
    }

    /// End offset of the last page, given the page count.
    pub fn pages_end(&self, page_count: usize) -> u64 {
        if page_count == 0 {
            self.payload_offset
        } else {
            self.data_offset(page_count - 1) + self.byte_len(page_count - 1) as u64
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_both_orders() {
        for endian in [Endianness::Little, Endianness::Big] {
            let mut header = FileHeader::new(endian, 4096);
            header.flags.insert(FileFlags::SYMTAB | FileFlags::ORDERED);
            header.symtab_offset = 123_456;
            header.symtab_size = 789;
            header.symbol_count = 12;
            header.record_count = 1_000_000;
            header.page_count = 250;
            header.footer_offset = 120_000;

            let bytes = header.to_bytes();
            let parsed = FileHeader::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, header);
        }
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = FileHeader::new(Endianness::Little, 4096).to_bytes();
        bytes[0] = b'X';
        let err = FileHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_header_rejects_future_version() {
        let mut bytes = FileHeader::new(Endianness::Little, 4096).to_bytes();
        bytes[4..8].copy_from_slice(b"9900");
        let err = FileHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::VersionTooNew { .. }));
        assert!(!err.is_repairable());
    }

    #[test]
    fn test_header_old_version_parses_but_fails_check() {
        let mut bytes = FileHeader::new(Endianness::Little, 4096).to_bytes();
        bytes[4..8].copy_from_slice(b"0001");
        let header = FileHeader::from_bytes(&bytes).unwrap();
        let err = header.check_version().unwrap_err();
        assert!(matches!(err, StoreError::VersionTooOld { .. }));
        assert!(err.is_repairable());
    }

    #[test]
    fn test_header_tolerates_missing_marker() {
        let mut bytes = FileHeader::new(Endianness::Little, 4096).to_bytes();
        bytes[8..10].copy_from_slice(b"\0\0");
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert!(parsed.legacy_marker);
        assert_eq!(parsed.endian, Endianness::Little);
    }

    #[test]
    fn test_header_too_short() {
        assert!(FileHeader::from_bytes(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_footer_entry_roundtrip() {
        let entry = PageEntry {
            offset: 0x1_0000_0000,
            length: 4096,
            ticks: 512,
        };
        for endian in [Endianness::Little, Endianness::Big] {
            let mut buf = Vec::new();
            entry.write_to(&mut buf, endian).unwrap();
            assert_eq!(buf.len(), FOOTER_ENTRY_SIZE);
            assert_eq!(PageEntry::from_bytes(&buf, endian).unwrap(), entry);
        }
    }

    #[test]
    fn test_geometry_header_shares_first_block() {
        // 4096-byte pages, header is exactly one block: page 0 full.
        let g = PageGeometry::new(4096, 4096);
        assert_eq!(g.slots_of(0), 512);
        assert_eq!(g.data_offset(0), 4096);
        assert_eq!(g.data_offset(1), 8192);

        // Larger pages: the header occupies the front of block 0 and
        // page 0 is short.
        let g = PageGeometry::new(4096, 16384);
        assert_eq!(g.slots_of(0), (16384 - 4096) / 8);
        assert_eq!(g.slots_of(1), 2048);
        assert_eq!(g.data_offset(0), 4096);
        assert_eq!(g.data_offset(1), 16384);
        assert_eq!(g.data_offset(2), 32768);
    }

    #[test]
    fn test_geometry_pages_end() {
        let g = PageGeometry::new(4096, 16384);
        assert_eq!(g.pages_end(0), 4096);
        assert_eq!(g.pages_end(1), 16384);
        assert_eq!(g.pages_end(3), 16384 + 2 * 16384);
    }

    #[test]
    fn test_flag_word_operations() {
        let mut flags = FileFlags::default();
        flags.insert(FileFlags::ORDERED);
        flags.insert(FileFlags::DIRTY);
        assert!(flags.contains(FileFlags::ORDERED));
        flags.remove(FileFlags::DIRTY);
        assert!(!flags.contains(FileFlags::DIRTY));
        assert!(flags.contains(FileFlags::ORDERED));
    }

    #[test]
    fn test_system_page_size_sane() {
        let sz = system_page_size();
        assert!(sz >= 4096);
        assert!(sz.is_power_of_two());
    }
}
