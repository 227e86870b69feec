//! Criterion benchmarks for the clock cycle.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pulsenet::prelude::*;

fn make_chain(tier: ExecutionTier, threads: usize) -> (Root, VideoChain) {
    let cfg = NetConfig::default()
        .with_tier(tier)
        .with_threads(threads)
        .with_seed(42);
    VideoChain::build(cfg, NoiseSource::new(42)).expect("video chain builds")
}

/// One full cycle (sweep + swap) of the reference chain, per execution tier.
fn bench_cycle_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_tier");
    group.throughput(Throughput::Elements(VideoChain::token_count() as u64));

    for tier in [ExecutionTier::Single, ExecutionTier::Threaded, ExecutionTier::Parallel] {
        group.bench_function(format!("{tier:?}").to_lowercase(), |b| {
            let (mut root, chain) = make_chain(tier, 4);
            b.iter(|| {
                let report = root.update().expect("cycle runs");
                black_box((report.fanins, root.to_values(chain.output).map(|v| v.len())))
            });
        });
    }

    group.finish();
}

/// Threaded cycles with a varying worker count.
fn bench_cycle_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_threads");
    group.throughput(Throughput::Elements(VideoChain::token_count() as u64));

    for threads in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("threaded", threads), threads, |b, &threads| {
            let (mut root, _) = make_chain(ExecutionTier::Threaded, threads);
            b.iter(|| black_box(root.update().expect("cycle runs").fanins));
        });
    }

    group.finish();
}

/// Raw atomic accumulation through the Layer routing.
fn bench_fanin(c: &mut Criterion) {
    let (root, chain) = make_chain(ExecutionTier::Single, 1);
    let origin = root.net().base(chain.output).expect("output exists").origin();

    c.bench_function("fanin_routed", |b| {
        let mut token = 0;
        b.iter(|| {
            token = (token + 1) % 64;
            black_box(root.net().fanin(root.top(), origin + token, 1).expect("fanin"))
        });
    });
}

criterion_group!(benches, bench_cycle_tiers, bench_cycle_threads, bench_fanin);
criterion_main!(benches);
