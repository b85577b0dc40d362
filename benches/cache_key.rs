//! Benchmarks for cache key generation
//!
//! This benchmark measures:
//! - Canonical JSON serialization of request payloads
//! - SHA-256 key derivation over small and document-sized payloads

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use ai_dispatch::cache::{canonical_json, CacheKeyGenerator};

fn payload(text_len: usize) -> Value {
    json!({
        "kind": "task",
        "task": "parse_resume",
        "model": "deepseek-ai/DeepSeek-V3",
        "json": true,
        "text": "x".repeat(text_len),
        "options": {"temperature": 0.3, "tags": ["a", "b", "c"], "nested": {"z": 1, "y": 2}}
    })
}

fn bench_canonical_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical_json");
    for size in [64usize, 4_096, 65_536] {
        let value = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, v| {
            b.iter(|| canonical_json(black_box(v)))
        });
    }
    group.finish();
}

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    let plain = CacheKeyGenerator::new();
    let prefixed = CacheKeyGenerator::new().with_prefix("docs:");
    for size in [64usize, 4_096, 65_536] {
        let value = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("plain", size), &value, |b, v| {
            b.iter(|| plain.generate(black_box(v)))
        });
        group.bench_with_input(BenchmarkId::new("prefixed", size), &value, |b, v| {
            b.iter(|| prefixed.generate(black_box(v)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_canonical_json, bench_key_generation);
criterion_main!(benches);
