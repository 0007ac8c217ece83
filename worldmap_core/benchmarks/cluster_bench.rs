use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use worldmap_core::{
    cluster::{cluster_bucketed, cluster_brute_force},
    ClusterInput, HexCoord, OwnerId,
};

fn scattered_inputs(count: usize, extent: i32) -> Vec<ClusterInput> {
    let mut rng = SmallRng::seed_from_u64(0xC1A5_7E55);
    (0..count)
        .map(|_| {
            let hex = HexCoord::new(rng.gen_range(-extent..=extent), rng.gen_range(-extent..=extent));
            let owner = OwnerId(rng.gen_range(0..4));
            ClusterInput::new(hex, Some(owner), None)
        })
        .collect()
}

fn bench_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster");

    for count in [250usize, 1_000, 4_000] {
        let inputs = scattered_inputs(count, 400);
        for radius in [2u32, 8] {
            let label = format!("{count}/r{radius}");
            group.bench_with_input(BenchmarkId::new("bucketed", &label), &inputs, |b, inputs| {
                b.iter(|| cluster_bucketed(black_box(inputs), radius))
            });
            group.bench_with_input(
                BenchmarkId::new("brute_force", &label),
                &inputs,
                |b, inputs| b.iter(|| cluster_brute_force(black_box(inputs), radius)),
            );
        }
    }

    group.finish();
}

criterion_group!(cluster_benches, bench_clustering);
criterion_main!(cluster_benches);
