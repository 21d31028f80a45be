//! K-way merge across the pages of one merge group.
//!
//! Every page in a group is presented as a slot buffer (memory-mapped
//! or owned after decompression); a cursor walks each page's record
//! run and the merge repeatedly emits the record with the smallest
//! header value. Key ties break by page visitation order (the first
//! page in the group wins) — a property of the traversal, not a
//! documented format guarantee.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{Result, StoreError};
use crate::record::{RecordHeader, FREE_SLOT};

/// Cursor over one page's record run.
struct PageCursor<S> {
    slots: S,
    pos: usize,
}

impl<S: AsRef<[u64]>> PageCursor<S> {
    fn new(slots: S) -> Self {
        Self { slots, pos: 0 }
    }

    /// Key of the current record, or None when exhausted.
    fn peek(&self) -> Option<u64> {
        let slots = self.slots.as_ref();
        if self.pos >= slots.len() {
            return None;
        }
        let raw = slots[self.pos];
        if raw == FREE_SLOT {
            return None;
        }
        Some(raw)
    }

    /// Current record's slots; advances past them.
    fn take(&mut self) -> Result<&[u64]> {
        let slots = self.slots.as_ref();
        let raw = slots[self.pos];
        let n = RecordHeader::from_raw(raw).slot_count()?;
        if self.pos + n > slots.len() {
            return Err(StoreError::InvalidRecord(format!(
                "record at slot {} runs past page end",
                self.pos
            )));
        }
        let run = &slots[self.pos..self.pos + n];
        self.pos += n;
        Ok(run)
    }
}

/// Merge the pages of one group, invoking `emit` once per record in
/// non-decreasing header order. `pages` must be given in visitation
/// (tie-break) order.
///
/// Returns the number of records emitted.
pub fn merge_group<S, F>(pages: Vec<S>, mut emit: F) -> Result<u64>
where
    S: AsRef<[u64]>,
    F: FnMut(&[u64]) -> Result<()>,
{
    let mut cursors: Vec<PageCursor<S>> = pages.into_iter().map(PageCursor::new).collect();

    // Heap of (key, visitation order); Reverse for a min-heap. The
    // order component makes equal keys pop first-page-first.
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::with_capacity(cursors.len());
    for (order, cursor) in cursors.iter().enumerate() {
        if let Some(key) = cursor.peek() {
            heap.push(Reverse((key, order)));
        }
    }

    let mut emitted = 0u64;
    while let Some(Reverse((_, order))) = heap.pop() {
        let cursor = &mut cursors[order];
        let run = cursor.take()?;
        emit(run)?;
        emitted += 1;
        if let Some(key) = cursor.peek() {
            heap.push(Reverse((key, order)));
        }
        // An exhausted page's cursor is dropped with the group; the
        // caller unmaps when the group's merge returns.
    }
    Ok(emitted)
}

// ── Tests ──────────────────────────────────────────────────────────
