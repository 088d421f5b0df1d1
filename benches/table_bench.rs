//! Cipher table benchmarks.
//!
//! Derivation runs once per password at startup; substitution sits on every
//! byte of every session, so its throughput is what actually matters.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use sstunnel::crypto::EncryptTable;

fn bench_table_derivation(c: &mut Criterion) {
    c.bench_function("table_derivation", |b| {
        b.iter(|| black_box(EncryptTable::new("benchmark password")))
    });
}

fn bench_encode_throughput(c: &mut Criterion) {
    let table = EncryptTable::new("benchmark password");
    let plain = vec![0xA5u8; 4096];
    let mut cipher = vec![0u8; 4096];

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("4096_bytes", |b| {
        b.iter(|| {
            table.encode_into(&plain, &mut cipher);
            black_box(&cipher);
        })
    });

    group.finish();
}

fn bench_decode_throughput(c: &mut Criterion) {
    let table = EncryptTable::new("benchmark password");
    let mut buf = vec![0x5Au8; 4096];

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("4096_bytes", |b| {
        b.iter(|| {
            table.decode_in_place(&mut buf);
            black_box(&buf);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_table_derivation,
    bench_encode_throughput,
    bench_decode_throughput,
);

criterion_main!(benches);
