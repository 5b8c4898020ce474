//! Benchmarks for the Hashwatch index
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hashwatch::index::*;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const HEADER: &str = "site,id,artist,hash,posted_at,updated_at,sha256,deleted,content_url";

/// Pseudo-random but reproducible hashes
fn hash_for(i: u64) -> i64 {
    i.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) as i64
}

fn write_dump(path: &Path, count: u64) {
    let mut out = String::with_capacity(count as usize * 160);
    out.push_str(HEADER);
    out.push('\n');
    for i in 0..count {
        out.push_str(&format!(
            "e621,{},artist{},{},2021-03-04T05:06:07Z,2021-03-04T05:06:07Z,\
             {:064x},false,https://cdn.example/{}.png\n",
            i,
            i % 500,
            hash_for(i),
            i,
            i
        ));
    }
    std::fs::write(path, out).unwrap();
}

fn bench_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidates");

    for flips in 0..=MAX_FLIPS {
        let count = candidates(0, flips).len();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(flips), &flips, |b, &flips| {
            b.iter(|| candidates(black_box(-3722692567699475621), flips))
        });
    }

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for size in [10_000u64, 100_000] {
        let dir = tempdir().unwrap();
        let dump = dir.path().join("dump.csv");
        write_dump(&dump, size);

        group.throughput(Throughput::Elements(size));

        group.bench_function(format!("build_{}", size), |b| {
            // Small runs so the merge stage is exercised
            let builder = IndexBuilder::new(dir.path().join("work")).pairs_per_run(8_192);
            b.iter(|| {
                builder
                    .build(
                        black_box(&dump),
                        &dir.path().join("hashes.bin"),
                        &dir.path().join("offsets.bin"),
                    )
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let dir = tempdir().unwrap();
    let store = Arc::new(GenerationStore::open(dir.path()).unwrap());
    let staging = store.reset_staging().unwrap();
    write_dump(&staging.join(DUMP_FILE), 100_000);

    let stats = IndexBuilder::new(dir.path().join("work"))
        .build(
            &staging.join(DUMP_FILE),
            &staging.join(HASHES_FILE),
            &staging.join(OFFSETS_FILE),
        )
        .unwrap();
    store
        .publish_staging(stats.records, stats.hash_crc32, stats.offset_crc32, None)
        .unwrap();

    let engine = QueryEngine::new(Arc::clone(&store), MAX_FLIPS);
    let present = hash_for(4242);

    for distance in [0, MAX_FLIPS] {
        group.bench_function(format!("hit_distance_{}", distance), |b| {
            b.iter(|| engine.find_matches_within(black_box(present), distance))
        });
    }

    group.bench_function("miss_distance_3", |b| {
        b.iter(|| engine.find_matches(black_box(0x0123_4567_89ab_cdef)))
    });

    group.finish();
}

criterion_group!(benches, bench_candidates, bench_build, bench_query);
criterion_main!(benches);
