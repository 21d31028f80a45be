//! Owned memory-mapped page regions.
//!
//! Each value owns exactly one mapping and unmaps on drop, on every
//! exit path. Requested offsets need not be OS-page aligned: the
//! mapping starts at the preceding page boundary and the view skips
//! the leading delta.

use std::fs::File;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Result, StoreError};
use crate::record::SLOT_BYTES;
use crate::store::layout::system_page_size;

fn align_down(offset: u64) -> u64 {
    offset & !(system_page_size() as u64 - 1)
}

/// Read-only mapping of one page's slot region.
#[derive(Debug)]
pub struct MappedRegion {
    mmap: Mmap,
    delta: usize,
    len: usize,
}

impl MappedRegion {
    /// Map `len` bytes at `offset`. `offset` and `len` must be slot
    /// multiples.
    pub fn map(file: &File, offset: u64, len: usize) -> Result<Self> {
        if offset % SLOT_BYTES as u64 != 0 || len % SLOT_BYTES != 0 {
            return Err(StoreError::InvalidFormat(format!(
                "unaligned page region: offset {} len {}",
                offset, len
            )));
        }
        let start = align_down(offset);
        let delta = (offset - start) as usize;
        // SAFETY: the file outlives the mapping only as long as this
        // process holds it open; single-writer access is assumed by
        // the store's concurrency contract.
        let mmap = unsafe { MmapOptions::new().offset(start).len(delta + len).map(file)? };
        Ok(Self { mmap, delta, len })
    }

    /// The page's slots.
    pub fn slots(&self) -> &[u64] {
        let bytes = &self.mmap[self.delta..self.delta + self.len];
        // SAFETY: the mapping is page aligned and `delta` is a slot
        // multiple, so the pointer is 8-byte aligned; length checked
        // at map time.
        unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const u64, bytes.len() / SLOT_BYTES)
        }
    }

    pub fn byte_len(&self) -> usize {
        self.len
    }
}

impl AsRef<[u64]> for MappedRegion {
    fn as_ref(&self) -> &[u64] {
        self.slots()
    }
}

/// Writable mapping of the live tail page (stream mode).
#[derive(Debug)]
pub struct MappedRegionMut {
    mmap: MmapMut,
    delta: usize,
    len: usize,
}

impl MappedRegionMut {
    /// Map `len` bytes at `offset` writable. The file must already
    /// span the region.
    pub fn map(file: &File, offset: u64, len: usize) -> Result<Self> {
        if offset % SLOT_BYTES as u64 != 0 || len % SLOT_BYTES != 0 {
            return Err(StoreError::InvalidFormat(format!(
                "unaligned page region: offset {} len {}",
                offset, len
            )));
        }
        let start = align_down(offset);
        let delta = (offset - start) as usize;
        // SAFETY: exclusive ownership of the tail page region is the
        // single-writer contract; readers of the same path see append
        // progress, which is the point of stream mode.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(delta + len)
                .map_mut(file)?
        };
        Ok(Self { mmap, delta, len })
    }

    pub fn slots_mut(&mut self) -> &mut [u64] {
        let range = self.delta..self.delta + self.len;
        let bytes = &mut self.mmap[range];
        // SAFETY: alignment and length as in `MappedRegion::slots`.
        unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut u64, bytes.len() / SLOT_BYTES)
        }
    }

    /// Flush written slots to the file.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
