//! Evaluator benchmarks.
//!
//! Measures full and incremental rounds over a wide fan-out graph: one root
//! summing many leaves, each leaf spinning a little to simulate work.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::Serialize;
use skygraph_core::{BuildDriver, Computed, Domain, EvaluationOptions, FunctionRegistry, NodeKey};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
enum Key {
    Leaf(u32),
    Sum(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Function {
    Leaf,
    Sum,
}

impl NodeKey for Key {
    type Function = Function;

    fn function(&self) -> Function {
        match self {
            Key::Leaf(_) => Function::Leaf,
            Key::Sum(_) => Function::Sum,
        }
    }
}

struct Bench;

impl Domain for Bench {
    type Key = Key;
    type Value = u64;
    type Error = String;
}

fn spin(seed: u32) -> u64 {
    (0..2_000u64).fold(u64::from(seed), |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn driver() -> BuildDriver<Bench> {
    let registry = FunctionRegistry::<Bench>::new()
        .register_fn(Function::Leaf, |key, _env| match key {
            Key::Leaf(n) => Ok(Computed::Value(spin(*n))),
            Key::Sum(_) => Err("not a leaf".to_string()),
        })
        .register_fn(Function::Sum, |key, env| {
            let Key::Sum(width) = key else {
                return Err("not a sum".to_string());
            };
            let leaves: Vec<Key> = (0..*width).map(Key::Leaf).collect();
            let values = env.get_values(&leaves);
            if env.values_missing() {
                return Ok(Computed::NeedsDeps);
            }
            Ok(Computed::Value(values.values().flatten().fold(0u64, |acc, v| acc.wrapping_add(**v))))
        });
    BuildDriver::new(registry)
}

fn thread_counts() -> Vec<usize> {
    let auto = EvaluationOptions::new().effective_threads();
    if auto > 1 {
        vec![1, auto]
    } else {
        vec![1]
    }
}

fn bench_full_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout/full");
    for width in [64u32, 1024] {
        for threads in thread_counts() {
            let options = EvaluationOptions::new().with_threads(threads);
            group.bench_with_input(BenchmarkId::new(format!("{threads}t"), width), &width, |b, &width| {
                b.iter(|| {
                    let mut driver = driver();
                    black_box(driver.evaluate([Key::Sum(width)], &options).ok());
                });
            });
        }
    }
    group.finish();
}

fn bench_incremental_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout/incremental");
    for width in [64u32, 1024] {
        for threads in thread_counts() {
            let options = EvaluationOptions::new().with_threads(threads);
            let mut driver = driver();
            let _ = driver.evaluate([Key::Sum(width)], &options);
            group.bench_with_input(BenchmarkId::new(format!("{threads}t"), width), &width, |b, &width| {
                b.iter(|| {
                    driver.invalidate([Key::Leaf(0)]);
                    black_box(driver.evaluate([Key::Sum(width)], &options).ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_full_round, bench_incremental_round);
criterion_main!(benches);
