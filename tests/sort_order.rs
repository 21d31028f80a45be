//! Close-time sort scenarios: interleaved pages, degenerate plans,
//! stable tie-breaks.

use tickstore::{OpenOptions, Payload, Record, RecordKind, Result, SubSecond, TickStore};

fn trade(seconds: u32, symbol: u16, size: u32) -> Record {
    Record::tick(
        RecordKind::Trade,
        seconds,
        SubSecond::Millis(0),
        symbol,
        2.5,
        size,
    )
    .unwrap()
}

fn writable(path: &std::path::Path) -> TickStore {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .page_bytes(1024)
        .open(path)
        .unwrap()
}

fn reopen_seconds(path: &std::path::Path) -> Vec<u32> {
    let store = TickStore::open_read(path).unwrap();
    assert!(store.is_sorted());
    let out = store
        .iter()
        .map(|r| r.unwrap().header.seconds())
        .collect();
    store.close().unwrap();
    out
}

#[test]
fn interleaved_pages_merge_into_global_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    // Three flushed pages with fully interleaved ranges: evens, odds,
    // then a third lacing through both.
    let mut store = writable(&path);
    for i in 0..64u32 {
        store.add_record(&trade(1000 + i * 2, 1, i)).unwrap();
    }
    store.flush().unwrap();
    for i in 0..64u32 {
        store.add_record(&trade(1001 + i * 2, 1, 100 + i)).unwrap();
    }
    store.flush().unwrap();
    for i in 0..64u32 {
        store.add_record(&trade(1000 + i * 3, 1, 200 + i)).unwrap();
    }
    store.close().unwrap();

    let seconds = reopen_seconds(&path);
    assert_eq!(seconds.len(), 192);
    for w in seconds.windows(2) {
        assert!(w[0] <= w[1]);
    }
}

#[test]
fn disjoint_pages_out_of_file_order_still_sort() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    // Page ranges are pairwise disjoint but appear in the file in the
    // wrong order: the degenerate one-group plan must fix them.
    let mut store = writable(&path);
    for base in [5000u32, 1000, 3000] {
        for i in 0..64u32 {
            store.add_record(&trade(base + i, 1, i)).unwrap();
        }
        store.flush().unwrap();
    }
    assert!(!store.is_sorted());
    store.close().unwrap();

    let seconds = reopen_seconds(&path);
    assert_eq!(seconds.len(), 192);
    assert_eq!(seconds[0], 1000);
    assert_eq!(*seconds.last().unwrap(), 5063);
    for w in seconds.windows(2) {
        assert!(w[0] <= w[1]);
    }
}

#[test]
fn equal_headers_keep_page_visitation_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    // Identical header in two different pages; the payload tells the
    // pages apart. Page ranges must overlap to force a real merge.
    let mut store = writable(&path);
    store.add_record(&trade(100, 1, 11)).unwrap();
    store.add_record(&trade(300, 1, 12)).unwrap();
    store.flush().unwrap();
    store.add_record(&trade(100, 1, 21)).unwrap();
    store.add_record(&trade(200, 1, 22)).unwrap();
    store.flush().unwrap();
    store.close().unwrap();

    let store = TickStore::open_read(&path).unwrap();
    let sizes: Vec<u32> = store
        .iter()
        .map(|r| match r.unwrap().payload {
            Payload::PriceSize { size, .. } => size,
            other => panic!("unexpected payload {:?}", other),
        })
        .collect();
    store.close().unwrap();
    assert_eq!(sizes, vec![11, 21, 22, 12], "first page wins the tie");
}

#[test]
fn mixed_width_records_survive_the_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    let quote = |seconds: u32| {
        Record::new(
            tickstore::RecordHeader::new(seconds, SubSecond::Millis(0), 1, RecordKind::Quote),
            Payload::Quote {
                bid: 9.0,
                bid_size: 1,
                ask: 9.5,
                ask_size: 2,
                bid_orders: 1,
                ask_orders: 1,
            },
        )
        .unwrap()
    };

    let mut store = writable(&path);
    for i in (0..40u32).rev() {
        store.add_record(&trade(2000 + i, 1, i)).unwrap();
        store.add_record(&quote(1000 + i)).unwrap();
    }
    store.close().unwrap();

    let store = TickStore::open_read(&path).unwrap();
    let records: Vec<Record> = store.iter().collect::<Result<_>>().unwrap();
    store.close().unwrap();

    assert_eq!(records.len(), 80);
    for w in records.windows(2) {
        assert!(w[0].header <= w[1].header);
    }
    // All quotes precede all trades: their timestamps are older.
    assert!(records[..40]
        .iter()
        .all(|r| r.header.kind() == Some(RecordKind::Quote)));
    assert!(records[40..]
        .iter()
        .all(|r| r.header.kind() == Some(RecordKind::Trade)));
}

#[test]
fn force_unsorted_rewrites_even_an_ordered_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    let mut store = writable(&path);
    for i in 0..100u32 {
        store.add_record(&trade(1000 + i, 1, i)).unwrap();
    }
    store.force_unsorted();
    assert!(!store.is_sorted());
    store.close().unwrap();

    let seconds = reopen_seconds(&path);
    assert_eq!(seconds.len(), 100);
    for w in seconds.windows(2) {
        assert!(w[0] <= w[1]);
    }
}

#[test]
fn compressed_store_sorts_at_close_too() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.tick");

    let mut store = OpenOptions::new()
        .create(true)
        .page_bytes(1024)
        .compressed(true)
        .open(&path)
        .unwrap();
    for i in (0..150u32).rev() {
        store.add_record(&trade(1000 + i, 1, i)).unwrap();
    }
    store.close().unwrap();

    let seconds = reopen_seconds(&path);
    assert_eq!(seconds.len(), 150);
    assert_eq!(seconds[0], 1000);
    for w in seconds.windows(2) {
        assert!(w[0] <= w[1]);
    }
}
