//! B+-tree benchmarks: inserts, point lookups and full scans through the
//! page cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagetree::{Config, Database};
use std::ops::Bound::Unbounded;
use tempfile::tempdir;

fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

/// Deterministic pseudo-random keys in `0..count`.
fn shuffled(count: u64) -> Vec<u64> {
    (0..count).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) % count).collect()
}

fn filled(count: u64) -> Database {
    let mut db = Database::in_memory(Config::default()).unwrap();
    for i in 0..count {
        db.insert(&key(i), &key(i)).unwrap();
    }
    db
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| filled(count));
        });

        group.bench_with_input(BenchmarkId::new("random", count), &count, |b, &count| {
            let keys = shuffled(count);
            b.iter(|| {
                let mut db = Database::in_memory(Config::default()).unwrap();
                for &i in &keys {
                    db.insert(&key(i), &key(i)).unwrap();
                }
                db
            });
        });
    }

    group.bench_function("file_sequential_1000", |b| {
        b.iter_with_setup(
            || tempdir().unwrap(),
            |dir| {
                let mut db = Database::create(dir.path().join("bench.db"), Config::default()).unwrap();
                for i in 0..1_000 {
                    db.insert(&key(i), &key(i)).unwrap();
                }
                db.close().unwrap();
                dir
            },
        );
    });

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_search");

    for count in [1_000u64, 10_000] {
        let db = filled(count);
        let keys = shuffled(count);
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("existing_key", count), &count, |b, _| {
            b.iter(|| {
                for &i in &keys {
                    black_box(db.search(&key(i)).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_scan");

    let count = 10_000u64;
    let db = filled(count);
    group.throughput(Throughput::Elements(count));
    group.bench_function("full_range", |b| {
        b.iter(|| db.range(Unbounded, Unbounded).map(Result::unwrap).count());
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_scan);
criterion_main!(benches);
