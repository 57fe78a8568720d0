// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Offset pattern microbenchmarks.
//!
//! Every read and write test fills or verifies buffers with the offset
//! pattern, so its cost bounds the throughput the suite can report.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fsperf_core::{PatternBuffer, PatternIndex, PatternSpec};
use std::time::Duration;

/// Buffer sizes to benchmark (in bytes).
const BUFFER_SIZES: &[usize] = &[512, 4096, 65536, 1024 * 1024];

fn bench_pattern_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_fill");
    group.measurement_time(Duration::from_secs(3));

    for &size in BUFFER_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut buf = vec![0u8; size];
            // Unaligned start offset exercises the partial leading word.
            b.iter(|| PatternBuffer::fill(black_box(0x1003), &mut buf, 0xf7));
            black_box(&buf);
        });
    }

    group.finish();
}

fn bench_pattern_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_verify");
    group.measurement_time(Duration::from_secs(3));

    for &size in BUFFER_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut buf = vec![0u8; size];
            PatternBuffer::fill(0x1003, &mut buf, 0xf7);
            b.iter(|| black_box(PatternBuffer::verify(black_box(0x1003), &buf, 0xf7)));
        });
    }

    group.finish();
}

fn bench_remote_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_pattern_byte_at");
    let spec = PatternSpec::get(PatternIndex::new(10).expect("pattern 10 exists"));
    let len = 65536u64;
    group.throughput(Throughput::Bytes(len));
    group.bench_function("64KB", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for distance in 0..len {
                sum += spec.byte_at(black_box(distance)) as u64;
            }
            black_box(sum)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_pattern_fill,
    bench_pattern_verify,
    bench_remote_pattern,
);

criterion_main!(benches);
