//! Wire codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use syncml_bench::utils::sync_message;
use syncml_codec::{decode_document, encode_document, encoded_size, Encoding};
use syncml_protocol::{SyncMlVersion, WireMessage};

const ENCODINGS: [Encoding; 2] = [Encoding::Xml, Encoding::Wbxml];

/// Benchmark encoding messages of growing size.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let namespace = SyncMlVersion::V1_2.namespace();

    for count in [1, 10, 100] {
        let root = sync_message(count, 256).to_element();
        for encoding in ENCODINGS {
            let size = encode_document(&root, encoding, namespace).unwrap().len();
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}"), count),
                &root,
                |b, root| {
                    b.iter(|| {
                        let bytes = encode_document(black_box(root), encoding, namespace).unwrap();
                        black_box(bytes);
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark decoding, including the mapping to protocol types.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for count in [1, 10, 100] {
        let message = sync_message(count, 256);
        for encoding in ENCODINGS {
            let bytes = message.encode(encoding).unwrap();
            group.throughput(Throughput::Bytes(bytes.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}_document"), count),
                &bytes,
                |b, bytes| {
                    b.iter(|| black_box(decode_document(black_box(bytes)).unwrap()));
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}_message"), count),
                &bytes,
                |b, bytes| {
                    b.iter(|| black_box(WireMessage::decode(black_box(bytes)).unwrap()));
                },
            );
        }
    }

    group.finish();
}

/// Benchmark size accounting, which runs for every command placed.
fn bench_encoded_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoded_size");
    let root = sync_message(10, 256).to_element();

    for encoding in ENCODINGS {
        group.bench_function(format!("{encoding:?}"), |b| {
            b.iter(|| black_box(encoded_size(black_box(&root), encoding)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_encoded_size);

criterion_main!(benches);
