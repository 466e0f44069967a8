use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hash_exec::{
    AggregateRegistry, AtomicAggregateTable, ColumnarTable, EquiJoinProbe, HashTable, JoinSide,
    KeyExtractor, KeyKind, MapStrategy, RadixBits, RayonScheduler, SharedHashTable, Table,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn table(rows: usize, keys: i64, seed: u64) -> Arc<dyn Table> {
    let mut rng = StdRng::seed_from_u64(seed);
    let key_column = (0..rows).map(|_| rng.random_range(0..keys)).collect();
    let value_column = (0..rows).map(|_| rng.random_range(0..100)).collect();
    Arc::new(ColumnarTable::from_i64_columns(&[("k", key_column), ("v", value_column)]).unwrap())
}

fn bench_builds(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_build");
    group.measurement_time(Duration::from_secs(10));
    let scheduler = RayonScheduler::new(4).unwrap();

    for rows in [10_000usize, 100_000].iter() {
        let input = table(*rows, 1_000, 7);
        group.throughput(Throughput::Elements(*rows as u64));

        group.bench_with_input(BenchmarkId::new("single_threaded", rows), &input, |b, input| {
            b.iter(|| HashTable::build(black_box(input.clone()), vec![0], KeyKind::GroupBy).unwrap());
        });

        for strategy in [MapStrategy::LockFree, MapStrategy::Locked] {
            group.bench_with_input(
                BenchmarkId::new(format!("shared_{}", strategy), rows),
                &input,
                |b, input| {
                    let extractor = KeyExtractor::new(KeyKind::GroupBy, vec![0]).unwrap();
                    b.iter(|| {
                        SharedHashTable::build_parallel(
                            black_box(input.clone()),
                            extractor.clone(),
                            strategy,
                            4,
                            &scheduler,
                        )
                        .unwrap()
                    });
                },
            );
        }

        group.bench_with_input(BenchmarkId::new("atomic_sum", rows), &input, |b, input| {
            let extractor = KeyExtractor::new(KeyKind::GroupBy, vec![0]).unwrap();
            let sum = AggregateRegistry::with_builtins().lookup("SUM").unwrap();
            b.iter(|| {
                AtomicAggregateTable::build_parallel(
                    black_box(input.clone()),
                    extractor.clone(),
                    1,
                    sum.clone(),
                    4,
                    &scheduler,
                )
                .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_join_probe(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_probe");
    let left_table = table(100_000, 10_000, 1);
    let right_table = table(50_000, 10_000, 2);

    for (bits1, bits2) in [(4u32, 0u32), (4, 4), (6, 4)] {
        let bits = RadixBits::new(bits1, bits2).unwrap();
        let left = JoinSide::partition(left_table.as_ref(), &[0], bits).unwrap();
        let right = JoinSide::partition(right_table.as_ref(), &[0], bits).unwrap();
        let probe = EquiJoinProbe::all_partitions(bits, &left).unwrap();

        group.bench_function(BenchmarkId::new("probe", format!("{}_{}", bits1, bits2)), |b| {
            b.iter(|| black_box(probe.probe(&left, &right).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_builds, bench_join_probe);
criterion_main!(benches);
