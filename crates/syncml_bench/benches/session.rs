//! Session engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use syncml_bench::utils::{loaded_pair, random_payload};
use syncml_engine::{split_point, Reassembly};
use syncml_protocol::{Encoding, Item, Meta, SyncOpKind};
use syncml_testkit::{client_config, server_config, SyncPair};

/// Benchmark complete first syncs of a client holding new items.
fn bench_first_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_sync");
    group.sample_size(20);

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || loaded_pair(count, 300),
                |mut pair| black_box(pair.run().unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark an item travelling in chunks.
fn bench_large_object(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_object");
    group.sample_size(20);

    group.bench_function("100k_in_4k_messages", |b| {
        let data = random_payload(100_000);
        b.iter_batched(
            || {
                let client = client_config().with_max_msg_size(4_000);
                let server = server_config().with_max_msg_size(4_000);
                let pair = SyncPair::with_configs(client, server);
                pair.client_backend.insert_local("big", data.clone());
                pair
            },
            |mut pair| black_box(pair.run().unwrap()),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark the chunking primitives.
fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");
    let data = random_payload(64 * 1024);

    group.bench_function("split_point_xml", |b| {
        b.iter(|| black_box(split_point(black_box(data.as_bytes()), 30_000, Encoding::Xml)));
    });

    group.bench_function("reassemble_16_chunks", |b| {
        let chunks: Vec<_> = data.as_bytes().chunks(4096).collect();
        b.iter(|| {
            let mut first = Item::with_source("big");
            let mut meta = Meta::with_type("text/plain");
            meta.size = Some(data.len() as u64);
            first.meta = Some(meta);
            let mut reassembly = Reassembly::begin(SyncOpKind::Add, &first, None).unwrap();
            for (i, chunk) in chunks.iter().enumerate() {
                let mut item = Item::with_source("big").data(chunk.to_vec());
                item.more_data = i + 1 < chunks.len();
                black_box(reassembly.add_chunk(&item, None));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_first_sync, bench_large_object, bench_chunking);

criterion_main!(benches);
