//! Benchmarks the cost of hybrid read/write dispatch (spec.md §4.5/§4.6):
//! a fully-mapped extent (pure memcpy path) versus a fully-unmapped extent
//! (positional I/O fallback), following the teacher's `harness = false`
//! criterion convention used throughout `velesdb-core/Cargo.toml`.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use exfile::{ExtendableFile, OpenOptions};
use tempfile::tempdir;

const SIZE: u64 = 1 << 20; // 1 MiB

fn bench_mapped_write(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let f = ExtendableFile::open(OpenOptions::new(dir.path().join("mapped.exfile")).initial_size(SIZE))
        .unwrap();
    f.add_mmap(0, SIZE).unwrap();
    let data = vec![0xABu8; SIZE as usize];

    let mut group = c.benchmark_group("write_fully_mapped");
    group.throughput(Throughput::Bytes(SIZE));
    group.bench_function("write_1mib", |b| {
        b.iter(|| {
            f.write(0, black_box(&data)).unwrap();
        });
    });
    group.finish();
}

fn bench_unmapped_write(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let f =
        ExtendableFile::open(OpenOptions::new(dir.path().join("unmapped.exfile")).initial_size(SIZE))
            .unwrap();
    let data = vec![0xABu8; SIZE as usize];

    let mut group = c.benchmark_group("write_fully_unmapped");
    group.throughput(Throughput::Bytes(SIZE));
    group.bench_function("write_1mib", |b| {
        b.iter(|| {
            f.write(0, black_box(&data)).unwrap();
        });
    });
    group.finish();
}

fn bench_mapped_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let f = ExtendableFile::open(OpenOptions::new(dir.path().join("mapped_read.exfile")).initial_size(SIZE))
        .unwrap();
    f.add_mmap(0, SIZE).unwrap();
    let mut buf = vec![0u8; SIZE as usize];

    let mut group = c.benchmark_group("read_fully_mapped");
    group.throughput(Throughput::Bytes(SIZE));
    group.bench_function("read_1mib", |b| {
        b.iter(|| {
            f.read(0, black_box(&mut buf)).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_mapped_write, bench_unmapped_write, bench_mapped_read);
criterion_main!(benches);
