use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vsearch_core::{FeatureVector, DESCRIPTOR_LEN};
use vsearch_index::{IndexConfig, SpatialIndex};

fn create_benchmark_features(count: usize, seed: u64) -> Vec<FeatureVector> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let mut descriptor = [0.0f32; DESCRIPTOR_LEN];
            for v in descriptor.iter_mut() {
                *v = rng.random_range(0.0..1.0);
            }
            let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
            descriptor.iter_mut().for_each(|v| *v /= norm);
            FeatureVector {
                x: 0.0,
                y: 0.0,
                scale: 1.0,
                orientation: 0.0,
                descriptor,
                owner: (i / 500) as u64,
            }
        })
        .collect()
}

/// Benchmark tree construction
fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    for &count in &[1_000, 10_000, 50_000] {
        let features = create_benchmark_features(count, 7);
        group.bench_with_input(BenchmarkId::from_parameter(count), &features, |b, features| {
            b.iter(|| black_box(SpatialIndex::build(features.clone(), IndexConfig::default()).unwrap()))
        });
    }
    group.finish();
}

/// Benchmark exact and budgeted KNN queries
fn bench_knn(c: &mut Criterion) {
    let features = create_benchmark_features(20_000, 11);
    let queries = create_benchmark_features(64, 12);
    let exact = SpatialIndex::build(features.clone(), IndexConfig::default()).unwrap();
    let approximate = SpatialIndex::build(features, IndexConfig::default().with_max_checks(256)).unwrap();

    let mut group = c.benchmark_group("knn");
    group.bench_function("exact_k5", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(exact.knn(black_box(&q.descriptor), 5));
            }
        })
    });
    group.bench_function("checks256_k5", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(approximate.knn(black_box(&q.descriptor), 5));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_knn);
criterion_main!(benches);
