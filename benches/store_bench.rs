//! Append and sort-path benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use tickstore::sort::{plan_merge, sort_page_slots, PageRange};
use tickstore::{OpenOptions, Record, RecordKind, SubSecond};

fn trade(seconds: u32, symbol: u16, size: u32) -> Record {
    Record::tick(
        RecordKind::Trade,
        seconds,
        SubSecond::Millis(0),
        symbol,
        1.0731,
        size,
    )
    .unwrap()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(100_000));
    group.bench_function("ordered_100k", |b| {
        b.iter_batched(
            || OpenOptions::new().open_temp().unwrap(),
            |mut store| {
                for i in 0..100_000u32 {
                    store.add_record(&trade(1_700_000_000 + i, 1, i)).unwrap();
                }
                store.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

fn bench_close_time_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("close_sort");
    group.sample_size(20);
    group.throughput(Throughput::Elements(100_000));
    group.bench_function("reversed_100k", |b| {
        b.iter_batched(
            || {
                let mut store = OpenOptions::new().open_temp().unwrap();
                for i in (0..100_000u32).rev() {
                    store.add_record(&trade(1_700_000_000 + i, 1, i)).unwrap();
                }
                store
            },
            |store| store.close().unwrap(),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

fn bench_local_sort(c: &mut Criterion) {
    let mut slots = Vec::new();
    for i in (0..2048u32).rev() {
        trade(i, 1, i).encode_into(&mut slots);
    }
    let mut group = c.benchmark_group("local_sort");
    group.throughput(Throughput::Elements(2048));
    group.bench_function("reversed_page", |b| {
        b.iter_batched_ref(
            || slots.clone(),
            |page| sort_page_slots(page),
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_merge_plan(c: &mut Criterion) {
    let ranges: Vec<PageRange> = (0..1000)
        .map(|i| PageRange {
            page: i,
            min: (i as u64) * 50,
            max: (i as u64) * 50 + 75, // neighbors overlap
        })
        .collect();
    c.bench_function("plan_1000_overlapping_pages", |b| {
        b.iter(|| plan_merge(&ranges));
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_close_time_sort,
    bench_local_sort,
    bench_merge_plan
);
criterion_main!(benches);
