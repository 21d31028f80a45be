//! In-memory write-behind page cache.
//!
//! Accumulates encoded records for the file's newest, not-yet
//! materialized page. NOT Send+Sync -- single-writer access assumed.
//!
//! The cache tracks two ordering conditions:
//! - `unsorted`: the current page contents are out of order and need a
//!   local sort before materialization;
//! - `needs_resort`: a new record sorts below something that was
//!   already flushed to disk, a global inversion that only the full
//!   merge sort at close time can repair.
//!
//! `last_appended` deliberately survives page boundaries: a record
//! that sorts below the previous page's tail marks the new page
//! unsorted even when the new page is internally ordered, which is
//! what lets the store detect inter-page interleaving.

use crate::record::{Record, FREE_SLOT};
use crate::sort::local::sort_page_slots;

/// Outcome of a single [`PageCache::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Record appended.
    Added,
    /// Sentinel header (zero or all-ones); silently dropped.
    Ignored,
    /// Header and payload disagree; refused, the cache is untouched.
    Rejected,
    /// Not enough free slots; caller must flush and retry.
    Full,
}

/// Summary of a materialized page, for footer accounting and the
/// merge plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStats {
    /// Records in the page.
    pub records: u32,
    /// Smallest header value in the page.
    pub min_header: u64,
    /// Largest header value in the page.
    pub max_header: u64,
    /// Whether the page needed a local sort before materialization.
    pub was_unsorted: bool,
}

/// Write-behind buffer for the newest page.
pub struct PageCache {
    slots: Vec<u64>,
    capacity: usize,
    records: u32,
    min_header: u64,
    max_header: u64,
    last_appended: u64,
    least_flushed: u64,
    unsorted: bool,
    needs_resort: bool,
}

impl PageCache {
    /// Create an empty cache with the given slot capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            records: 0,
            min_header: FREE_SLOT,
            max_header: 0,
            last_appended: 0,
            least_flushed: 0,
            unsorted: false,
            needs_resort: false,
        }
    }

    /// Append a record.
    ///
    /// Sentinel headers (zero, all-ones) are dropped without error; a
    /// record whose header and payload disagree is `Rejected` (its
    /// header would claim slots the payload does not fill, tearing the
    /// page); `Full` is returned when the record's slot count does not
    /// fit. Neither outcome touches the cache.
    pub fn add(&mut self, record: &Record) -> AddOutcome {
        let h = record.header.raw();
        if h == 0 || h == FREE_SLOT {
            return AddOutcome::Ignored;
        }
        if record.validate().is_err() {
            return AddOutcome::Rejected;
        }
        let needed = record.slot_count();
        if self.slots.len() + needed > self.capacity {
            return AddOutcome::Full;
        }

        record.encode_into(&mut self.slots);
        self.records += 1;
        self.min_header = self.min_header.min(h);
        self.max_header = self.max_header.max(h);

        if self.last_appended != 0 && h < self.last_appended {
            self.unsorted = true;
            if self.least_flushed != 0 && h < self.least_flushed {
                // Below everything ever flushed: some earlier page on
                // disk holds a larger value than this record.
                self.needs_resort = true;
            }
        }
        self.last_appended = h;
        AddOutcome::Added
    }

    /// Number of filled slots.
    pub fn fill(&self) -> usize {
        self.slots.len()
    }

    /// Slot capacity of the page being built.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots remaining.
    pub fn remaining(&self) -> usize {
        self.capacity - self.slots.len()
    }

    /// Records currently buffered.
    pub fn record_count(&self) -> u32 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current page contents out of order.
    pub fn is_unsorted(&self) -> bool {
        self.unsorted
    }

    /// Sticky: a global inversion was observed at some point.
    pub fn needs_resort(&self) -> bool {
        self.needs_resort
    }

    /// Read-only view of the buffered slots (live-cache seek path).
    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    /// Take the page contents for materialization, local-sorting them
    /// first when out of order, and reset to empty with the capacity
    /// of the next page. Returns the padded slot buffer (trailing free
    /// pattern up to the old capacity) and the page stats.
    ///
    /// `least_flushed`, `last_appended` and the sticky `needs_resort`
    /// flag survive the reset.
    pub fn take_page(&mut self, next_capacity: usize) -> (Vec<u64>, PageStats) {
        let was_unsorted = self.unsorted;
        let mut slots = std::mem::take(&mut self.slots);
        if was_unsorted {
            tracing::debug!(records = self.records, "local-sorting page before flush");
            sort_page_slots(&mut slots);
        }
        slots.resize(self.capacity, FREE_SLOT);

        let stats = PageStats {
            records: self.records,
            min_header: self.min_header,
            max_header: self.max_header,
            was_unsorted,
        };

        if stats.records > 0 {
            self.least_flushed = if self.least_flushed == 0 {
                stats.min_header
            } else {
                self.least_flushed.min(stats.min_header)
            };
        }

        self.capacity = next_capacity;
        self.slots = Vec::with_capacity(next_capacity);
        self.records = 0;
        self.min_header = FREE_SLOT;
        self.max_header = 0;
        self.unsorted = false;
        (slots, stats)
    }

    /// Discard contents without materializing (error paths). Ordering
    /// bookkeeping is kept; dropped records never reached disk.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.records = 0;
        self.min_header = FREE_SLOT;
        self.max_header = 0;
        self.unsorted = false;
    }
}

// ── Tests ──────────────────────────────────────────────────────────
