//! Per-page local sort.
//!
//! Sorts the variable-width records inside one page's slot buffer by
//! their header key. The page is first indexed (one entry per record:
//! key, slot offset, slot count), the index is sorted with an odd-even
//! merge network over power-of-two batches merged pairwise bottom-up,
//! and the records are then re-materialized ("collated") in permuted
//! order. Working memory is bounded by twice the page size.
//!
//! Records with equal header values keep no particular relative order;
//! the key index carries only the key.

use crate::record::{RecordHeader, FREE_SLOT};

/// Batch size for the sorting network. Each batch is sorted by a
/// Batcher odd-even merge network; batches are then merged pairwise.
const SORT_BATCH: usize = 64;

/// One index entry per record in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyEntry {
    key: u64,
    offset: u32,
    slots: u32,
}

/// Sentinel entry used to pad a batch to its power-of-two size; sorts
/// after every real key and is stripped before collation.
const PAD: KeyEntry = KeyEntry {
    key: u64::MAX,
    offset: u32::MAX,
    slots: 0,
};

// ── Index construction ─────────────────────────────────────────────

/// Walk the record run at the start of `slots` and build the key
/// index. Stops at the first free slot. Returns the index and the
/// number of slots occupied by records.
fn index_records(slots: &[u64]) -> (Vec<KeyEntry>, usize) {
    let mut keys = Vec::new();
    let mut pos = 0usize;
    while pos < slots.len() {
        let raw = slots[pos];
        if raw == FREE_SLOT {
            break;
        }
        let n = match RecordHeader::from_raw(raw).slot_count() {
            Ok(n) => n,
            // A malformed header cannot be stepped over; stop the walk
            // and leave the remainder untouched.
            Err(_) => break,
        };
        if pos + n > slots.len() {
            break;
        }
        keys.push(KeyEntry {
            key: raw,
            offset: pos as u32,
            slots: n as u32,
        });
        pos += n;
    }
    (keys, pos)
}

// ── Odd-even merge network ─────────────────────────────────────────

#[inline]
fn compare_exchange(keys: &mut [KeyEntry], i: usize, j: usize) {
    if keys[i].key > keys[j].key {
        keys.swap(i, j);
    }
}

/// Batcher odd-even merge of two sorted halves of `keys[lo..lo+n]`.
/// `n` is a power of two; `r` is the comparator stride.
fn odd_even_merge(keys: &mut [KeyEntry], lo: usize, n: usize, r: usize) {
    let m = r * 2;
    if m < n {
        odd_even_merge(keys, lo, n, m); // even subsequence
        odd_even_merge(keys, lo + r, n, m); // odd subsequence
        let mut i = lo + r;
        while i + r < lo + n {
            compare_exchange(keys, i, i + r);
            i += m;
        }
    } else {
        compare_exchange(keys, lo, lo + r);
    }
}

/// Batcher odd-even merge sort of `keys[lo..lo+n]`, n a power of two.
fn odd_even_merge_sort(keys: &mut [KeyEntry], lo: usize, n: usize) {
    if n > 1 {
        let m = n / 2;
        odd_even_merge_sort(keys, lo, m);
        odd_even_merge_sort(keys, lo + m, m);
        odd_even_merge(keys, lo, n, 1);
    }
}

/// Sort the key index: pad to the power-of-two ceiling of the batch
/// size per block, network-sort each block, then merge sorted blocks
/// pairwise bottom-up.
fn sort_keys(keys: &mut Vec<KeyEntry>) {
    let real = keys.len();
    if real <= 1 {
        return;
    }

    // Pad so every block is exactly the network size (the power-of-two
    // ceiling of the final short block).
    let block = SORT_BATCH.min(real.next_power_of_two());
    let padded = real.div_ceil(block) * block;
    keys.resize(padded, PAD);

    // Network-sort each block.
    let mut lo = 0;
    while lo < padded {
        odd_even_merge_sort(keys, lo, block);
        lo += block;
    }

    // Merge blocks pairwise, bottom-up, into an aux buffer.
    let mut width = block;
    let mut aux: Vec<KeyEntry> = Vec::with_capacity(padded);
    while width < padded {
        aux.clear();
        let mut start = 0;
        while start < padded {
            let mid = (start + width).min(padded);
            let end = (start + width * 2).min(padded);
            merge_runs(&keys[start..mid], &keys[mid..end], &mut aux);
            start = end;
        }
        keys.copy_from_slice(&aux[..padded]);
        width *= 2;
    }

    keys.truncate(real);
}

/// Standard two-way merge of sorted runs, appending to `out`.
fn merge_runs(a: &[KeyEntry], b: &[KeyEntry], out: &mut Vec<KeyEntry>) {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].key <= b[j].key {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
}

// ── Entry point ────────────────────────────────────────────────────

/// Sort the record run at the start of a page slot buffer in place.
///
/// Trailing free slots (and anything after a malformed header) are
/// left untouched. Allocates one page-sized scratch buffer for the
/// collation pass.
pub fn sort_page_slots(slots: &mut [u64]) {
    let (mut keys, data_end) = index_records(slots);
    if keys.len() <= 1 {
        return;
    }

    sort_keys(&mut keys);

    // Collate: re-materialize records in sorted order.
    let mut collated: Vec<u64> = Vec::with_capacity(data_end);
    for entry in &keys {
        let start = entry.offset as usize;
        let end = start + entry.slots as usize;
        collated.extend_from_slice(&slots[start..end]);
    }
    slots[..data_end].copy_from_slice(&collated);
}

/// Whether the record run at the start of the buffer is already in
/// non-decreasing header order.
pub fn is_sorted_run(slots: &[u64]) -> bool {
    let (keys, _) = index_records(slots);
    keys.windows(2).all(|w| w[0].key <= w[1].key)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Payload, Record, RecordHeader, RecordKind, SubSecond};

    fn trade(seconds: u32, symbol: u16, price: f32) -> Record {
        Record::tick(
            RecordKind::Trade,
            seconds,
            SubSecond::Millis(0),
            symbol,
            price,
            1,
        )
        .unwrap()
    }

    fn quote(seconds: u32, symbol: u16) -> Record {
        Record::new(
            RecordHeader::new(seconds, SubSecond::Millis(0), symbol, RecordKind::Quote),
            Payload::Quote {
                bid: 1.0,
                bid_size: 1,
                ask: 2.0,
                ask_size: 2,
                bid_orders: 1,
                ask_orders: 1,
            },
        )
        .unwrap()
    }

    fn encode_all(records: &[Record]) -> Vec<u64> {
        let mut slots = Vec::new();
        for r in records {
            r.encode_into(&mut slots);
        }
        slots
    }

    fn decode_all(slots: &[u64]) -> Vec<Record> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < slots.len() && slots[pos] != FREE_SLOT {
            let rec = Record::decode(&slots[pos..]).unwrap();
            pos += rec.slot_count();
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_empty_and_single() {
        let mut slots: Vec<u64> = vec![];
        sort_page_slots(&mut slots);

        let mut slots = encode_all(&[trade(5, 1, 1.0)]);
        let before = slots.clone();
        sort_page_slots(&mut slots);
        assert_eq!(slots, before);
    }

    #[test]
    fn test_sorts_reversed_run() {
        let records: Vec<Record> = (0..10).rev().map(|i| trade(100 + i, 1, i as f32)).collect();
        let mut slots = encode_all(&records);
        sort_page_slots(&mut slots);

        let sorted = decode_all(&slots);
        assert_eq!(sorted.len(), 10);
        for w in sorted.windows(2) {
            assert!(w[0].header <= w[1].header);
        }
        // Same multiset.
        let mut expected = records;
        expected.sort_by_key(|r| r.header);
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_mixed_width_records() {
        let records = vec![
            quote(300, 2),
            trade(100, 1, 1.0),
            quote(200, 3),
            trade(250, 1, 2.0),
            trade(50, 9, 3.0),
        ];
        let mut slots = encode_all(&records);
        sort_page_slots(&mut slots);

        let sorted = decode_all(&slots);
        assert_eq!(sorted.len(), 5);
        let seconds: Vec<u32> = sorted.iter().map(|r| r.header.seconds()).collect();
        assert_eq!(seconds, vec![50, 100, 200, 250, 300]);
    }

    #[test]
    fn test_trailing_free_slots_untouched() {
        let mut slots = encode_all(&[trade(9, 1, 1.0), trade(3, 1, 2.0)]);
        slots.resize(16, FREE_SLOT);
        sort_page_slots(&mut slots);

        assert_eq!(RecordHeader::from_raw(slots[0]).seconds(), 3);
        for &s in &slots[4..] {
            assert_eq!(s, FREE_SLOT);
        }
    }

    #[test]
    fn test_larger_than_one_batch() {
        // More records than SORT_BATCH forces the pairwise block merge.
        let n = SORT_BATCH * 3 + 17;
        let records: Vec<Record> = (0..n)
            .map(|i| trade(((i * 7919) % 10_000) as u32 + 1, 1, i as f32))
            .collect();
        let mut slots = encode_all(&records);
        sort_page_slots(&mut slots);

        let sorted = decode_all(&slots);
        assert_eq!(sorted.len(), n);
        for w in sorted.windows(2) {
            assert!(w[0].header <= w[1].header);
        }
        let mut expected = records;
        expected.sort_by_key(|r| r.header);
        // Equal keys have unspecified order but payloads here are all
        // distinct per key modulus; compare headers only.
        let got: Vec<u64> = sorted.iter().map(|r| r.header.raw()).collect();
        let want: Vec<u64> = expected.iter().map(|r| r.header.raw()).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_is_sorted_run() {
        let slots = encode_all(&[trade(1, 1, 1.0), trade(2, 1, 1.0)]);
        assert!(is_sorted_run(&slots));
        let slots = encode_all(&[trade(2, 1, 1.0), trade(1, 1, 1.0)]);
        assert!(!is_sorted_run(&slots));
    }

    #[test]
    fn test_already_sorted_is_stable_fixpoint() {
        let records: Vec<Record> = (0..40).map(|i| trade(i, 1, i as f32)).collect();
        let mut slots = encode_all(&records);
        let before = slots.clone();
        sort_page_slots(&mut slots);
        assert_eq!(slots, before);
    }
}
