//! Benchmarks for migration planning.

use std::hint::black_box;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tidemark_migrate::{
    Direction, LedgerEntry, Migration, MigrationId, MigrationSet, Target, compute_plan,
};

/// Build a set of `count` reversible migrations.
fn migration_set(count: u32) -> MigrationSet {
    let migrations = (1..=count)
        .map(|i| {
            Migration::new(i, format!("step_{}", i), format!("CREATE TABLE t{} (id INTEGER);", i))
                .with_down_script(format!("DROP TABLE t{};", i))
        })
        .collect();
    MigrationSet::new(migrations).unwrap()
}

/// Ledger entries for the first `count` migrations of `set`.
fn ledger(set: &MigrationSet, count: usize) -> Vec<LedgerEntry> {
    set.iter()
        .take(count)
        .map(|m| LedgerEntry {
            migration_id: m.id,
            name: m.name.clone(),
            checksum: m.checksum.clone(),
            applied_at: Utc::now(),
        })
        .collect()
}

fn bench_forward_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_plan");

    for size in [10u32, 100, 1000] {
        let set = migration_set(size);
        let applied = ledger(&set, size as usize / 2);

        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                compute_plan(black_box(&set), black_box(&applied), Direction::Up, Target::Latest)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_reverse_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_plan");

    for size in [10u32, 100, 1000] {
        let set = migration_set(size);
        let applied = ledger(&set, size as usize);
        let target = Target::Version(MigrationId::from(size / 2));

        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                compute_plan(black_box(&set), black_box(&applied), Direction::Down, target).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_forward_plan, bench_reverse_plan);
criterion_main!(benches);
