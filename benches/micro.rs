//! Micro-benchmarks for chronodb-core's codecs, B+Tree, and memtable.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- btree     # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use chronodb_core::btree::{BTreeBuilder, BTreeReader};
use chronodb_core::codec::delta::DeltaBitPackingEncoder;
use chronodb_core::codec::int_packing::IntPackingEncoder;
use chronodb_core::interfaces::{Flusher, IdGenerator};
use chronodb_core::memtable::Memtable;
use chronodb_core::tsd::{FieldType, SlotValue};
use std::sync::atomic::{AtomicU32, Ordering};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

struct SeqIdGenerator {
    next_metric_id: AtomicU32,
    next_series_id: AtomicU32,
}

impl SeqIdGenerator {
    fn new() -> Self {
        Self {
            next_metric_id: AtomicU32::new(1),
            next_series_id: AtomicU32::new(1),
        }
    }
}

impl IdGenerator for SeqIdGenerator {
    type Error = std::convert::Infallible;

    fn gen_metric_id(&self, _name: &str) -> u32 {
        self.next_metric_id.fetch_add(1, Ordering::Relaxed)
    }

    fn gen_field_id(&self, _metric_id: u32, _name: &str, _field_type: FieldType) -> Result<u16, Self::Error> {
        Ok(1)
    }

    fn gen_tag_id(&self, _metric_id: u32, _tag_hash: u64) -> u32 {
        self.next_series_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct NullSink;

impl Flusher for NullSink {
    type Error = std::convert::Infallible;

    fn add(&mut self, _key: &[u8], _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn make_sorted_entries(count: u64) -> Vec<(Vec<u8>, u64)> {
    (0..count)
        .map(|i| (format!("series-{i:012}").into_bytes(), i))
        .collect()
}

// ================================================================================================
// Columnar codec benchmarks
// ================================================================================================

fn bench_delta_bit_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_bit_packing_encode");
    for count in [1_000u64, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let values: Vec<i32> = (0..count as i32).map(|i| i * 7 % 997).collect();
            b.iter_batched(
                || values.clone(),
                |values| {
                    let mut enc = DeltaBitPackingEncoder::new();
                    for v in values {
                        enc.add(black_box(v));
                    }
                    black_box(enc.bytes().unwrap())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_int_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("int_packing_encode");
    for count in [1_000u64, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let values: Vec<u32> = (0..count as u32).map(|i| i * 10).collect();
            b.iter_batched(
                || values.clone(),
                |values| {
                    let mut enc = IntPackingEncoder::new();
                    for v in values {
                        enc.add(black_box(v)).unwrap();
                    }
                    black_box(enc.bytes())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// ================================================================================================
// B+Tree benchmarks
// ================================================================================================

fn build_tree(entries: Vec<(Vec<u8>, u64)>) -> Vec<u8> {
    let mut builder = BTreeBuilder::new();
    for (key, value) in entries {
        builder.push(key, value);
    }
    builder.build(chronodb_core::btree::builder::DEFAULT_FANOUT).unwrap()
}

fn bench_btree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_build");
    for count in [1_000u64, 50_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let entries = make_sorted_entries(count);
            b.iter_batched(|| entries.clone(), |entries| black_box(build_tree(entries)), BatchSize::LargeInput);
        });
    }
    group.finish();
}

fn bench_btree_lookup(c: &mut Criterion) {
    let count = 100_000u64;
    let bytes = build_tree(make_sorted_entries(count));
    let reader = BTreeReader::new(bytes).unwrap();

    let mut group = c.benchmark_group("btree_lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("point_get_middle_key", |b| {
        let key = format!("series-{:012}", count / 2).into_bytes();
        b.iter(|| black_box(reader.get(black_box(&key))));
    });
    group.finish();
}

// ================================================================================================
// Memtable benchmarks
// ================================================================================================

fn bench_memtable_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_write");
    for series_count in [100u64, 10_000] {
        group.throughput(Throughput::Elements(series_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(series_count),
            &series_count,
            |b, &series_count| {
                b.iter_batched(
                    || Memtable::new(SeqIdGenerator::new(), 16, 3_600_000, 100_000),
                    |mt| {
                        for i in 0..series_count {
                            let host = format!("host-{i}");
                            mt.write(
                                "cpu.load",
                                &[("host", &host)],
                                1,
                                FieldType::Gauge,
                                0,
                                (i % 3600) as u32,
                                SlotValue::Float(black_box(i as f64)),
                            )
                            .unwrap();
                        }
                        black_box(mt)
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_memtable_flush(c: &mut Criterion) {
    c.bench_function("memtable_flush_family_10k_series", |b| {
        b.iter_batched(
            || {
                let mt = Memtable::new(SeqIdGenerator::new(), 16, 3_600_000, 100_000);
                for i in 0..10_000u64 {
                    let host = format!("host-{i}");
                    mt.write("cpu.load", &[("host", &host)], 1, FieldType::Gauge, 0, 0, SlotValue::Float(i as f64))
                        .unwrap();
                }
                mt
            },
            |mt| {
                let mut sink = NullSink;
                black_box(mt.flush_family_to(&mut sink, 0).unwrap());
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_delta_bit_packing,
    bench_int_packing,
    bench_btree_build,
    bench_btree_lookup,
    bench_memtable_write,
    bench_memtable_flush,
);
criterion_main!(benches);
