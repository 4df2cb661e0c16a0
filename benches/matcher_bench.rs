// benches/matcher_bench.rs

//! Glob matcher benchmarks
//!
//! Measures pattern compilation (cached and uncached) and evaluation against
//! realistic entity strings.

use criterion::{Criterion, criterion_group, criterion_main};
use palisade::core::matcher::Glob;
use std::hint::black_box;

fn bench_compile_cached(c: &mut Criterion) {
    // The first compile warms the cache; the benchmark measures cache hits.
    let _ = Glob::compile("@spam*:evil.example");
    c.bench_function("compile_cached", |b| {
        b.iter(|| black_box(Glob::compile(black_box("@spam*:evil.example"))))
    });
}

fn bench_match_lowercase_entity(c: &mut Criterion) {
    let glob = Glob::compile("@spam*:evil.example");
    c.bench_function("match_lowercase_entity", |b| {
        b.iter(|| black_box(glob.matches(black_box("@spam1234:evil.example"))))
    });
}

fn bench_match_mixed_case_entity(c: &mut Criterion) {
    let glob = Glob::compile("@spam*:evil.example");
    c.bench_function("match_mixed_case_entity", |b| {
        b.iter(|| black_box(glob.matches(black_box("@Spam1234:Evil.Example"))))
    });
}

fn bench_match_miss(c: &mut Criterion) {
    let glob = Glob::compile("@spam*:evil.example");
    c.bench_function("match_miss", |b| {
        b.iter(|| black_box(glob.matches(black_box("@alice:good.example"))))
    });
}

fn bench_rule_set_scan(c: &mut Criterion) {
    // A realistic list: a few hundred patterns evaluated against one entity.
    let globs: Vec<Glob> = (0..300)
        .map(|i| Glob::compile(&format!("@spam{i}*:server-{i}.example")))
        .collect();
    c.bench_function("rule_set_scan_300", |b| {
        b.iter(|| {
            globs
                .iter()
                .filter(|g| g.matches(black_box("@user:plain.example")))
                .count()
        })
    });
}

criterion_group!(
    benches,
    bench_compile_cached,
    bench_match_lowercase_entity,
    bench_match_mixed_case_entity,
    bench_match_miss,
    bench_rule_set_scan
);
criterion_main!(benches);
