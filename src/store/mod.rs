//! File store: open modes, page materialization, seek, close-time
//! repair.
//!
//! A store is a header block, N fixed-capacity slot pages, and an
//! optional trailer (footer range table + serialized symbol table).
//! Appends accumulate in the write-behind [`PageCache`] and
//! materialize one page at a time; a file whose pages interleave in
//! time is rewritten globally sorted at close via the sort engine.
//!
//! Single-writer, synchronous. Every operation that grows or maps the
//! file may block on I/O; an interrupted growth leaves the file at its
//! last fully-written length.

pub mod codec;
pub mod layout;
pub mod mapped;

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::{AddOutcome, PageCache};
use crate::endian::Endianness;
use crate::error::{Result, StoreError};
use crate::record::{Record, RecordHeader, FREE_SLOT, SLOT_BYTES};
use crate::sort::{merge_group, plan_merge, PageRange};
use crate::symtab::SymbolTable;

use codec::{bytes_to_slots, compress_page, decompress_page, slots_to_bytes};
use layout::{
    default_page_bytes, FileFlags, FileHeader, PageEntry, PageGeometry, FOOTER_ENTRY_SIZE,
    HEADER_SIZE,
};
use mapped::{MappedRegion, MappedRegionMut};

// ── Open options ───────────────────────────────────────────────────

/// Builder for opening a store.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read_only: bool,
    create: bool,
    truncate: bool,
    stream: bool,
    compressed: bool,
    tolerant: bool,
    endian: Option<Endianness>,
    page_bytes: Option<usize>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, v: bool) -> Self {
        self.read_only = v;
        self
    }

    pub fn create(mut self, v: bool) -> Self {
        self.create = v;
        self
    }

    pub fn truncate(mut self, v: bool) -> Self {
        self.truncate = v;
        self
    }

    /// Keep the tail page mapped over the live file so concurrent
    /// readers of the same path observe append progress.
    pub fn stream(mut self, v: bool) -> Self {
        self.stream = v;
        self
    }

    /// Compress materialized pages. Incompatible with stream mode.
    pub fn compressed(mut self, v: bool) -> Self {
        self.compressed = v;
        self
    }

    /// Accept repairable files: dirty sessions and old versions, both
    /// upgraded to a clean current-version file on close.
    pub fn tolerant(mut self, v: bool) -> Self {
        self.tolerant = v;
        self
    }

    /// Byte order for a newly created file.
    pub fn endianness(mut self, e: Endianness) -> Self {
        self.endian = Some(e);
        self
    }

    /// Page size override in bytes (slot-multiple), for tests and
    /// small files.
    pub fn page_bytes(mut self, bytes: usize) -> Self {
        self.page_bytes = Some(bytes);
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<TickStore> {
        let path = path.as_ref();
        self.validate()?;
        let exists = path.exists() && !self.truncate;
        let file = FsOpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .create(self.create && !self.read_only)
            .truncate(self.truncate && !self.read_only)
            .open(path)?;
        if exists && file.metadata()?.len() > 0 {
            TickStore::load(file, Some(path.to_path_buf()), self)
        } else if self.read_only {
            Err(StoreError::InvalidFormat(format!(
                "empty file {}",
                path.display()
            )))
        } else {
            TickStore::init(file, Some(path.to_path_buf()), self)
        }
    }

    /// Open over an anonymous temporary file, removed when the store
    /// is dropped.
    pub fn open_temp(self) -> Result<TickStore> {
        self.validate()?;
        if self.read_only {
            return Err(StoreError::ReadOnlyMode);
        }
        let file = tempfile::tempfile()?;
        TickStore::init(file, None, self)
    }

    fn validate(&self) -> Result<()> {
        if self.stream && self.compressed {
            return Err(StoreError::InvalidFormat(
                "stream mode cannot compress pages".into(),
            ));
        }
        if self.stream && self.endian.is_some_and(|e| e.needs_swap()) {
            // The tail mapping carries native-order slots.
            return Err(StoreError::InvalidFormat(
                "stream mode writes in native byte order".into(),
            ));
        }
        if let Some(bytes) = self.page_bytes {
            if bytes < SLOT_BYTES * 4 || bytes % SLOT_BYTES != 0 {
                return Err(StoreError::InvalidFormat(format!(
                    "page size {} is not a usable slot multiple",
                    bytes
                )));
            }
        }
        Ok(())
    }
}

// ── Store info ─────────────────────────────────────────────────────

/// Snapshot of store metadata, serializable for diagnostics tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    pub path: Option<PathBuf>,
    pub version: String,
    pub endianness: String,
    pub sorted: bool,
    pub compressed: bool,
    pub stream: bool,
    pub record_count: u64,
    pub page_count: u32,
    pub symbol_count: u32,
    pub page_bytes: u32,
}

// ── Page bookkeeping ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PageInfo {
    entry: PageEntry,
    min: u64,
    max: u64,
}

/// A loaded page: mapped when the bytes can be used in place, owned
/// after decompression or byte swapping.
enum PageSlots {
    Mapped(MappedRegion),
    Owned(Vec<u64>),
}

impl AsRef<[u64]> for PageSlots {
    fn as_ref(&self) -> &[u64] {
        match self {
            PageSlots::Mapped(m) => m.slots(),
            PageSlots::Owned(v) => v,
        }
    }
}

/// Count, min and max header of the record run in a page.
fn scan_page(slots: &[u64]) -> (u32, u64, u64) {
    let mut count = 0u32;
    let mut min = FREE_SLOT;
    let mut max = 0u64;
    let mut pos = 0usize;
    while pos < slots.len() {
        let raw = slots[pos];
        if raw == FREE_SLOT {
            break;
        }
        let n = match RecordHeader::from_raw(raw).slot_count() {
            Ok(n) => n,
            Err(_) => break,
        };
        if pos + n > slots.len() {
            break;
        }
        count += 1;
        min = min.min(raw);
        max = max.max(raw);
        pos += n;
    }
    (count, min, max)
}

// ── Store ──────────────────────────────────────────────────────────

/// An open tick store.
pub struct TickStore {
    file: File,
    path: Option<PathBuf>,
    header: FileHeader,
    geometry: PageGeometry,
    symbols: SymbolTable,
    cache: PageCache,
    pages: Vec<PageInfo>,
    tail: Option<MappedRegionMut>,
    read_only: bool,
    stream: bool,
    compressed: bool,
    /// Materialized pages are globally ordered.
    sorted: bool,
    closed: bool,
}

impl TickStore {
    /// Convenience: create or truncate a store at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().create(true).truncate(true).open(path)
    }

    /// Convenience: open an existing store read-only.
    pub fn open_read<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().read_only(true).open(path)
    }

    fn init(file: File, path: Option<PathBuf>, opts: OpenOptions) -> Result<Self> {
        let endian = opts.endian.unwrap_or_else(Endianness::native);
        let page_bytes = opts.page_bytes.unwrap_or_else(default_page_bytes);
        let mut header = FileHeader::new(endian, page_bytes as u32);
        header.flags.insert(FileFlags::DIRTY);
        if opts.stream {
            header.flags.insert(FileFlags::STREAM);
        }
        if opts.compressed {
            header.flags.insert(FileFlags::COMPRESSED);
        }
        let geometry = PageGeometry::new(header.payload_offset, page_bytes);

        file.set_len(HEADER_SIZE as u64)?;
        file.write_all_at(&header.to_bytes(), 0)?;

        let cache = PageCache::new(geometry.slots_of(0));
        tracing::info!(
            path = ?path,
            page_bytes,
            stream = opts.stream,
            compressed = opts.compressed,
            "created store"
        );
        Ok(Self {
            file,
            path,
            header,
            geometry,
            symbols: SymbolTable::new(),
            cache,
            pages: Vec::new(),
            tail: None,
            read_only: false,
            stream: opts.stream,
            compressed: opts.compressed,
            sorted: true,
            closed: false,
        })
    }

    fn load(file: File, path: Option<PathBuf>, opts: OpenOptions) -> Result<Self> {
        let mut head = vec![0u8; HEADER_SIZE];
        file.read_exact_at(&mut head, 0)?;
        let header = FileHeader::from_bytes(&head)?;

        if let Err(err) = header.check_version() {
            if !opts.tolerant {
                return Err(err);
            }
            tracing::warn!(
                path = ?path,
                version = %String::from_utf8_lossy(&header.version),
                "old file version, will be upgraded on close"
            );
        }
        if header.flags.contains(FileFlags::DIRTY) && !opts.tolerant {
            return Err(StoreError::DirtyFile);
        }
        if header.legacy_marker {
            tracing::warn!(path = ?path, "old unmarked file, will be upgraded on close");
        }

        if header.page_bytes as usize % SLOT_BYTES != 0
            || header.page_bytes == 0
            || header.payload_offset < HEADER_SIZE as u64
        {
            return Err(StoreError::InvalidFormat(format!(
                "implausible geometry: page {} bytes, payload at {}",
                header.page_bytes, header.payload_offset
            )));
        }
        let geometry = PageGeometry::new(header.payload_offset, header.page_bytes as usize);
        let compressed = header.flags.contains(FileFlags::COMPRESSED);
        if compressed && !header.flags.contains(FileFlags::RANGE_TABLE) && header.page_count > 0 {
            return Err(StoreError::InvalidFormat(
                "compressed file without a range table, pages unlocatable".into(),
            ));
        }
        let endian = header.endian;

        // Symbol table.
        let symbols = if header.flags.contains(FileFlags::SYMTAB) && header.symtab_size > 0 {
            let mut buf = vec![0u8; header.symtab_size as usize];
            file.read_exact_at(&mut buf, header.symtab_offset)?;
            let (table, _) = SymbolTable::from_bytes(&buf, endian)?;
            table
        } else {
            SymbolTable::new()
        };

        // Footer range table.
        let entries: Vec<PageEntry> = if header.flags.contains(FileFlags::RANGE_TABLE) {
            let mut buf = vec![0u8; header.page_count as usize * FOOTER_ENTRY_SIZE];
            file.read_exact_at(&mut buf, header.footer_offset)?;
            buf.chunks_exact(FOOTER_ENTRY_SIZE)
                .map(|c| PageEntry::from_bytes(c, endian))
                .collect::<Result<_>>()?
        } else {
            (0..header.page_count as usize)
                .map(|i| PageEntry {
                    offset: geometry.data_offset(i),
                    length: geometry.byte_len(i) as u32,
                    ticks: 0,
                })
                .collect()
        };

        let mut store = Self {
            file,
            path,
            header,
            geometry,
            symbols,
            cache: PageCache::new(geometry.slots_of(entries.len())),
            pages: entries
                .iter()
                .map(|&entry| PageInfo {
                    entry,
                    min: 0,
                    max: 0,
                })
                .collect(),
            tail: None,
            read_only: opts.read_only,
            stream: opts.stream,
            compressed,
            sorted: true,
            closed: false,
        };

        // Ranges and tick counts come from scanning the pages; the
        // footer carries counts but not min/max.
        let had_footer = store.header.flags.contains(FileFlags::RANGE_TABLE);
        for i in 0..store.pages.len() {
            let slots = store.load_page(i)?;
            let (ticks, min, max) = scan_page(slots.as_ref());
            let info = &mut store.pages[i];
            if had_footer && info.entry.ticks != ticks {
                return Err(StoreError::InvalidFormat(format!(
                    "page {} footer says {} records, found {}",
                    i, info.entry.ticks, ticks
                )));
            }
            info.entry.ticks = ticks;
            info.min = min;
            info.max = max;
        }

        store.sorted = store.header.flags.contains(FileFlags::ORDERED)
            || store.check_page_order();
        if store.header.flags.contains(FileFlags::DIRTY) {
            tracing::warn!(path = ?store.path, "repairing dirty file");
            store.sorted = store.check_page_order();
        }

        if !opts.read_only {
            // Appending overwrites the old trailer; drop it.
            let end = store.pages_end();
            store.file.set_len(end)?;
            store.header.footer_offset = 0;
            store.header.symtab_offset = 0;
            store.header.symtab_size = 0;
            store.header.flags.remove(FileFlags::RANGE_TABLE);
            store.header.flags.remove(FileFlags::SYMTAB);
            store.header.flags.remove(FileFlags::ORDERED);
            store.header.flags.insert(FileFlags::DIRTY);
            store.file.write_all_at(&store.header.to_bytes(), 0)?;
        }

        tracing::info!(
            path = ?store.path,
            records = store.header.record_count,
            pages = store.pages.len(),
            sorted = store.sorted,
            "opened store"
        );
        Ok(store)
    }

    fn check_page_order(&self) -> bool {
        self.pages
            .windows(2)
            .all(|w| w[0].entry.ticks == 0 || w[1].entry.ticks == 0 || w[1].min >= w[0].max)
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn file_name(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> String {
        String::from_utf8_lossy(&self.header.version).into_owned()
    }

    pub fn endianness(&self) -> Endianness {
        self.header.endian
    }

    /// Change the byte order of a store that has not materialized any
    /// data yet.
    pub fn set_endianness(&mut self, endian: Endianness) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnlyMode);
        }
        if !self.pages.is_empty() || !self.cache.is_empty() {
            return Err(StoreError::InvalidFormat(
                "cannot change byte order after records were added".into(),
            ));
        }
        self.header.endian = endian;
        self.file.write_all_at(&self.header.to_bytes(), 0)?;
        Ok(())
    }

    /// Whether the materialized file is globally header-ordered and no
    /// pending record breaks that.
    pub fn is_sorted(&self) -> bool {
        self.sorted && !self.cache.needs_resort()
    }

    /// Force a full re-sort at close time.
    pub fn force_unsorted(&mut self) {
        self.sorted = false;
    }

    pub fn record_count(&self) -> u64 {
        self.materialized_records() + self.cache.record_count() as u64
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn materialized_records(&self) -> u64 {
        self.pages.iter().map(|p| p.entry.ticks as u64).sum()
    }

    fn pages_end(&self) -> u64 {
        self.pages
            .last()
            .map(|p| p.entry.offset + p.entry.length as u64)
            .unwrap_or(self.header.payload_offset)
    }

    /// Metadata snapshot.
    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            path: self.path.clone(),
            version: self.version(),
            endianness: match self.header.endian {
                Endianness::Little => "little".into(),
                Endianness::Big => "big".into(),
            },
            sorted: self.is_sorted(),
            compressed: self.compressed,
            stream: self.stream,
            record_count: self.record_count(),
            page_count: self.pages.len() as u32,
            symbol_count: self.symbols.len() as u32,
            page_bytes: self.header.page_bytes,
        }
    }

    // ── Symbols ────────────────────────────────────────────────────

    pub fn resolve_symbol(&mut self, name: &str) -> Result<u16> {
        if self.read_only {
            // Read-only sessions may look up but not assign.
            return self.symbols.get(name).ok_or(StoreError::ReadOnlyMode);
        }
        self.symbols.resolve(name)
    }

    pub fn symbol_name(&self, index: u16) -> Option<&str> {
        self.symbols.name(index)
    }

    pub fn bind_symbol(&mut self, name: &str, index: u16) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnlyMode);
        }
        self.symbols.bind(name, index)
    }

    pub fn unbind_symbol(&mut self, name: &str) -> Option<u16> {
        if self.read_only {
            return None;
        }
        self.symbols.unbind(name)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    // ── Append path ────────────────────────────────────────────────

    /// Append a record. On a full cache the current page is flushed
    /// and the add retried once.
    pub fn add_record(&mut self, record: &Record) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnlyMode);
        }
        match self.cache_add(record)? {
            AddOutcome::Added | AddOutcome::Ignored => Ok(()),
            AddOutcome::Rejected => record.validate(),
            AddOutcome::Full => {
                self.flush()?;
                match self.cache_add(record)? {
                    AddOutcome::Added | AddOutcome::Ignored => Ok(()),
                    AddOutcome::Rejected => record.validate(),
                    AddOutcome::Full => Err(StoreError::CacheFull {
                        needed: record.slot_count(),
                        free: self.cache.remaining(),
                    }),
                }
            }
        }
    }

    fn cache_add(&mut self, record: &Record) -> Result<AddOutcome> {
        let before = self.cache.fill();
        let outcome = self.cache.add(record);
        if outcome == AddOutcome::Added && self.stream {
            self.write_through_tail(before)?;
        }
        Ok(outcome)
    }

    /// Stream mode: mirror freshly cached slots into the live tail
    /// mapping.
    fn write_through_tail(&mut self, from: usize) -> Result<()> {
        if self.tail.is_none() {
            let idx = self.pages.len();
            let offset = self.geometry.data_offset(idx);
            let len = self.geometry.byte_len(idx);
            self.file.set_len(offset + len as u64)?;
            let mut tail = MappedRegionMut::map(&self.file, offset, len)?;
            tail.slots_mut().fill(FREE_SLOT);
            self.tail = Some(tail);
        }
        let cached = self.cache.slots();
        let tail = self.tail.as_mut().expect("tail mapped above");
        tail.slots_mut()[from..cached.len()].copy_from_slice(&cached[from..]);
        Ok(())
    }

    /// Materialize the cached page, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnlyMode);
        }
        if self.cache.is_empty() {
            return Ok(());
        }
        let idx = self.pages.len();
        let next_capacity = self.geometry.slots_of(idx + 1);
        let (slots, stats) = self.cache.take_page(next_capacity);
        if stats.records == 0 {
            return Ok(());
        }

        let (offset, length) = if self.stream {
            // Data already lives in the file through the tail mapping;
            // the local sort, if any, must be written back.
            let offset = self.geometry.data_offset(idx);
            let length = self.geometry.byte_len(idx);
            if let Some(mut tail) = self.tail.take() {
                if stats.was_unsorted {
                    tail.slots_mut().copy_from_slice(&slots);
                }
                tail.sync()?;
            }
            (offset, length)
        } else if self.compressed {
            let offset = self.pages_end();
            let bytes = compress_page(&slots, self.header.endian)?;
            self.file.set_len(offset + bytes.len() as u64)?;
            self.file.write_all_at(&bytes, offset)?;
            (offset, bytes.len())
        } else {
            let offset = self.geometry.data_offset(idx);
            let bytes = slots_to_bytes(&slots, self.header.endian);
            self.file.set_len(offset + bytes.len() as u64)?;
            self.file.write_all_at(&bytes, offset)?;
            (offset, bytes.len())
        };

        if let Some(prev) = self.pages.last() {
            if prev.entry.ticks > 0 && stats.min_header < prev.max {
                tracing::debug!(page = idx, "page range overlaps predecessor");
                self.sorted = false;
            }
        }
        self.pages.push(PageInfo {
            entry: PageEntry {
                offset,
                length: length as u32,
                ticks: stats.records,
            },
            min: stats.min_header,
            max: stats.max_header,
        });

        self.header.record_count = self.materialized_records();
        self.header.page_count = self.pages.len() as u32;
        self.file.write_all_at(&self.header.to_bytes(), 0)?;
        tracing::debug!(
            page = idx,
            records = stats.records,
            offset,
            length,
            "materialized page"
        );
        Ok(())
    }

    // ── Read path ──────────────────────────────────────────────────

    fn load_page(&self, index: usize) -> Result<PageSlots> {
        let info = self
            .pages
            .get(index)
            .ok_or(StoreError::RecordNotFound(index as u64))?;
        let endian = self.header.endian;
        if self.compressed {
            let mut buf = vec![0u8; info.entry.length as usize];
            self.file.read_exact_at(&mut buf, info.entry.offset)?;
            return Ok(PageSlots::Owned(decompress_page(&buf, endian)?));
        }
        if endian.needs_swap() {
            let mut buf = vec![0u8; info.entry.length as usize];
            self.file.read_exact_at(&mut buf, info.entry.offset)?;
            return Ok(PageSlots::Owned(bytes_to_slots(&buf, endian)?));
        }
        Ok(PageSlots::Mapped(MappedRegion::map(
            &self.file,
            info.entry.offset,
            info.entry.length as usize,
        )?))
    }

    /// Record at global position `index` (append order while the
    /// session is unsorted, header order once sorted).
    pub fn seek(&self, index: u64) -> Result<Record> {
        let mut remaining = index;
        for i in 0..self.pages.len() {
            let ticks = self.pages[i].entry.ticks as u64;
            if remaining < ticks {
                let slots = self.load_page(i)?;
                return nth_record(slots.as_ref(), remaining);
            }
            remaining -= ticks;
        }
        // Tail: live cache.
        if remaining < self.cache.record_count() as u64 {
            return nth_record(self.cache.slots(), remaining);
        }
        Err(StoreError::RecordNotFound(index))
    }

    /// Iterate every record in the store.
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            store: self,
            page: 0,
            slots: None,
            pos: 0,
        }
    }

    // ── Close & repair ─────────────────────────────────────────────

    /// Flush, repair ordering if needed, write the trailer and clear
    /// the dirty flag.
    pub fn close(mut self) -> Result<()> {
        if self.read_only {
            self.closed = true;
            return Ok(());
        }
        self.flush()?;
        if !self.is_sorted() && !self.pages.is_empty() {
            self.rewrite_sorted()?;
        }
        self.write_trailer()?;
        self.closed = true;
        tracing::info!(
            path = ?self.path,
            records = self.header.record_count,
            pages = self.header.page_count,
            "closed store"
        );
        Ok(())
    }

    /// Footer, symbol table, then header, in that order: the header is
    /// the commit point.
    fn write_trailer(&mut self) -> Result<()> {
        let endian = self.header.endian;
        let footer_offset = self.pages_end();

        let mut trailer = Vec::new();
        for info in &self.pages {
            info.entry.write_to(&mut trailer, endian)?;
        }
        let symtab_offset = footer_offset + trailer.len() as u64;
        let mut symtab = Vec::new();
        self.symbols.write_to(&mut symtab, endian)?;
        trailer.write_all(&symtab)?;
        self.file.set_len(footer_offset + trailer.len() as u64)?;
        self.file.write_all_at(&trailer, footer_offset)?;

        self.header.footer_offset = footer_offset;
        self.header.symtab_offset = symtab_offset;
        self.header.symtab_size = symtab.len() as u32;
        self.header.symbol_count = self.symbols.len() as u32;
        self.header.record_count = self.materialized_records();
        self.header.page_count = self.pages.len() as u32;
        self.header.version = layout::VERSION;
        self.header.legacy_marker = false;
        self.header.flags.insert(FileFlags::RANGE_TABLE);
        self.header.flags.insert(FileFlags::SYMTAB);
        if self.sorted {
            self.header.flags.insert(FileFlags::ORDERED);
        } else {
            self.header.flags.remove(FileFlags::ORDERED);
        }
        self.header.flags.remove(FileFlags::DIRTY);
        self.file.write_all_at(&self.header.to_bytes(), 0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Rewrite the file globally sorted through the merge plan, then
    /// swap it in place of the original (temp-file-and-rename).
    fn rewrite_sorted(&mut self) -> Result<()> {
        let ranges: Vec<PageRange> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.entry.ticks > 0)
            .map(|(i, p)| PageRange {
                page: i,
                min: p.min,
                max: p.max,
            })
            .collect();
        let plan = plan_merge(&ranges);
        tracing::info!(
            pages = ranges.len(),
            groups = plan.groups.len(),
            widest = plan.widest_group(),
            "rewriting file in sorted order"
        );

        let named;
        let out_file: File = match self.path.as_ref().and_then(|p| p.parent()) {
            Some(dir) => {
                named = Some(tempfile::NamedTempFile::new_in(dir)?);
                named.as_ref().expect("just set").as_file().try_clone()?
            }
            None => {
                named = None;
                tempfile::tempfile()?
            }
        };

        let mut writer = SortedWriter::new(
            out_file,
            self.geometry,
            self.header.endian,
            self.compressed,
        )?;
        for group in &plan.groups {
            let mut mapped = Vec::with_capacity(group.len());
            for &page in group {
                mapped.push(self.load_page(page)?);
            }
            merge_group(mapped, |run| writer.push(run))?;
            // Mappings drop here, before the next group maps its pages.
        }
        let (file, pages) = writer.finish()?;

        // Swap the rewritten file in.
        match (named, self.path.as_ref()) {
            (Some(tmp), Some(path)) => {
                tmp.persist(path)
                    .map_err(|e| StoreError::Io(e.error))?;
                self.file = file;
            }
            _ => {
                self.file = file;
            }
        }
        self.pages = pages;
        self.sorted = true;
        self.header.record_count = self.materialized_records();
        self.header.page_count = self.pages.len() as u32;
        Ok(())
    }
}

impl Drop for TickStore {
    fn drop(&mut self) {
        if !self.closed && !self.read_only {
            tracing::warn!(path = ?self.path, "store dropped without close, file left dirty");
        }
    }
}

/// Decode the `n`-th record of a slot run.
fn nth_record(slots: &[u64], n: u64) -> Result<Record> {
    let mut pos = 0usize;
    let mut left = n;
    while pos < slots.len() && slots[pos] != FREE_SLOT {
        let rec = Record::decode(&slots[pos..])?;
        if left == 0 {
            return Ok(rec);
        }
        left -= 1;
        pos += rec.slot_count();
    }
    Err(StoreError::RecordNotFound(n))
}

// ── Sorted rewrite writer ──────────────────────────────────────────

/// Sequentially materializes sorted pages into a fresh file.
struct SortedWriter {
    file: File,
    geometry: PageGeometry,
    endian: Endianness,
    compressed: bool,
    page: Vec<u64>,
    index: usize,
    end: u64,
    pages: Vec<PageInfo>,
    ticks: u32,
    min: u64,
    max: u64,
}

impl SortedWriter {
    fn new(
        file: File,
        geometry: PageGeometry,
        endian: Endianness,
        compressed: bool,
    ) -> Result<Self> {
        file.set_len(HEADER_SIZE as u64)?;
        Ok(Self {
            file,
            geometry,
            endian,
            compressed,
            page: Vec::with_capacity(geometry.slots_of(0)),
            index: 0,
            end: geometry.payload_offset,
            pages: Vec::new(),
            ticks: 0,
            min: FREE_SLOT,
            max: 0,
        })
    }

    fn push(&mut self, run: &[u64]) -> Result<()> {
        let capacity = self.geometry.slots_of(self.index);
        if self.page.len() + run.len() > capacity {
            self.materialize()?;
        }
        self.page.extend_from_slice(run);
        self.ticks += 1;
        self.min = self.min.min(run[0]);
        self.max = self.max.max(run[0]);
        Ok(())
    }

    fn materialize(&mut self) -> Result<()> {
        if self.ticks == 0 {
            return Ok(());
        }
        let capacity = self.geometry.slots_of(self.index);
        self.page.resize(capacity, FREE_SLOT);

        let (offset, length) = if self.compressed {
            let bytes = compress_page(&self.page, self.endian)?;
            let offset = self.end;
            self.file.set_len(offset + bytes.len() as u64)?;
            self.file.write_all_at(&bytes, offset)?;
            (offset, bytes.len())
        } else {
            let offset = self.geometry.data_offset(self.index);
            let bytes = slots_to_bytes(&self.page, self.endian);
            self.file.set_len(offset + bytes.len() as u64)?;
            self.file.write_all_at(&bytes, offset)?;
            (offset, bytes.len())
        };
        self.end = offset + length as u64;
        self.pages.push(PageInfo {
            entry: PageEntry {
                offset,
                length: length as u32,
                ticks: self.ticks,
            },
            min: self.min,
            max: self.max,
        });
        self.index += 1;
        self.page = Vec::with_capacity(self.geometry.slots_of(self.index));
        self.ticks = 0;
        self.min = FREE_SLOT;
        self.max = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<(File, Vec<PageInfo>)> {
        self.materialize()?;
        Ok((self.file, self.pages))
    }
}

// ── Iterator ───────────────────────────────────────────────────────

/// Sequential record cursor; one page mapped at a time.
pub struct RecordIter<'a> {
    store: &'a TickStore,
    page: usize,
    slots: Option<PageSlots>,
    pos: usize,
}

impl RecordIter<'_> {
    fn advance(&mut self) -> Result<Option<Record>> {
        loop {
            if self.slots.is_none() {
                if self.page < self.store.pages.len() {
                    self.slots = Some(self.store.load_page(self.page)?);
                } else if self.page == self.store.pages.len()
                    && !self.store.cache.is_empty()
                {
                    self.slots = Some(PageSlots::Owned(self.store.cache.slots().to_vec()));
                } else {
                    return Ok(None);
                }
                self.pos = 0;
            }
            let slots = self.slots.as_ref().expect("loaded above");
            let run = slots.as_ref();
            if self.pos >= run.len() || run[self.pos] == FREE_SLOT {
                self.slots = None;
                self.page += 1;
                continue;
            }
            let rec = Record::decode(&run[self.pos..])?;
            self.pos += rec.slot_count();
            return Ok(Some(rec));
        }
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
