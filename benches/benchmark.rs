use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use docrag::{split, FlatIndex, IndexStore};
use rand::prelude::*;
use std::hint::black_box;

const DIMENSIONS: usize = 384; // all-MiniLM-L6-v2 width
const NUM_QUERIES: usize = 10; // Number of queries per iteration
const TOP_K: usize = 3;

fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(10)
        .measurement_time(std::time::Duration::from_secs(10))
        .warm_up_time(std::time::Duration::from_secs(2))
        .configure_from_args()
}

fn random_vectors(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn chunk_document(c: &mut Criterion) {
    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(2_000);
    c.bench_function("split 114k characters", |b| {
        b.iter(|| split(black_box(&text), 500, 100).unwrap())
    });
}

fn build_and_search(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);

    let mut group = c.benchmark_group("flat_index");
    for size in [100usize, 1_000, 5_000] {
        let vectors = random_vectors(&mut rng, size);
        let queries = random_vectors(&mut rng, NUM_QUERIES);

        group.bench_with_input(BenchmarkId::new("build", size), &vectors, |b, vectors| {
            b.iter(|| FlatIndex::build(black_box(vectors)).unwrap())
        });

        let index = FlatIndex::build(&vectors).unwrap();
        group.bench_with_input(
            BenchmarkId::new(format!("search_{}_queries", NUM_QUERIES), size),
            &index,
            |b, index| {
                b.iter(|| {
                    for query in &queries {
                        black_box(index.search(query, TOP_K).unwrap());
                    }
                })
            },
        );
    }
    group.finish();
}

fn save_and_load(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let dir = tempfile::tempdir().unwrap();
    let store = IndexStore::new(dir.path().join("benchmark.index")).unwrap();

    let vectors = random_vectors(&mut rng, 1_000);
    let chunks: Vec<String> = (0..vectors.len())
        .map(|i| format!("chunk {} ", i).repeat(40))
        .collect();
    let index = FlatIndex::build(&vectors).unwrap();

    c.bench_function("save 1000-chunk bundle", |b| {
        b.iter(|| store.save(&index, &chunks).unwrap())
    });

    store.save(&index, &chunks).unwrap();
    c.bench_function("load 1000-chunk bundle", |b| {
        b.iter(|| {
            let bundle = store.load().unwrap();
            assert_eq!(bundle.chunks.len(), bundle.index.len());
        })
    });
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = chunk_document, build_and_search, save_and_load
}
criterion_main!(benches);
