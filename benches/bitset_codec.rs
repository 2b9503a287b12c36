//! Benchmarks for lakegrid selection hot paths.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure:
//! - Mask packing and the zlib+base64 codec at common grid sizes
//! - Rasterization in both modes
//! - Overlap checks between packed bitsets

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use lakegrid::geometry::parse::parse_geometry;
use lakegrid::{rasterize, Bitset, GridSpec, SelectionMask};
use serde_json::json;

/// Checkerboard-ish mask with runs, closer to real selections than noise
fn sample_mask(side: usize) -> SelectionMask {
    let cells = (0..side * side)
        .map(|i| (i / side + i % side) % 7 < 3)
        .collect();
    SelectionMask::from_cells(side, side, cells).unwrap()
}

/// Benchmark packing masks into bitsets
fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");

    for side in [100, 500, 1000] {
        let mask = sample_mask(side);
        group.bench_with_input(BenchmarkId::new("side", side), &mask, |b, mask| {
            b.iter(|| Bitset::pack(black_box(mask)));
        });
    }

    group.finish();
}

/// Benchmark encode / decode at stored and preview compression levels
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let bitset = Bitset::pack(&sample_mask(1000));

    for level in [6, 9] {
        group.bench_with_input(BenchmarkId::new("encode_level", level), &level, |b, &level| {
            b.iter(|| black_box(&bitset).encode(level).unwrap());
        });
    }

    let encoded = bitset.encode(6).unwrap();
    group.bench_function("decode", |b| {
        b.iter(|| black_box(&encoded).decode().unwrap());
    });

    group.finish();
}

/// Benchmark rasterizing a 64-vertex polygon onto a 1000x1000 grid
fn bench_rasterize(c: &mut Criterion) {
    let grid = GridSpec::new(1000, 1000, 10.0, "EPSG:32632", 500_000.0, 5_010_000.0);
    let ring: Vec<[f64; 2]> = (0..=64)
        .map(|i| {
            let t = std::f64::consts::TAU * f64::from(i % 64) / 64.0;
            let r = 3_000.0 + 800.0 * (3.0 * t).sin();
            [505_000.0 + r * t.cos(), 5_005_000.0 + r * t.sin()]
        })
        .collect();
    let geometry = parse_geometry(&json!({ "type": "Polygon", "coordinates": [ring] })).unwrap();

    let mut group = c.benchmark_group("rasterize");

    for all_touched in [false, true] {
        group.bench_with_input(
            BenchmarkId::new("all_touched", all_touched),
            &all_touched,
            |b, &all_touched| {
                b.iter(|| rasterize(black_box(&geometry), &grid, all_touched).unwrap());
            },
        );
    }

    group.finish();
}

/// Benchmark the overlap check and union of two simulation-sized bitsets
fn bench_overlap(c: &mut Criterion) {
    let occupied = Bitset::pack(&sample_mask(1000));
    let candidate = Bitset::zeroed(1000 * 1000);

    let mut group = c.benchmark_group("overlap");

    group.bench_function("intersects", |b| {
        b.iter(|| black_box(&occupied).intersects(black_box(&candidate)).unwrap());
    });

    group.bench_function("union", |b| {
        b.iter(|| black_box(&occupied).union(black_box(&candidate)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_pack, bench_codec, bench_rasterize, bench_overlap);
criterion_main!(benches);
