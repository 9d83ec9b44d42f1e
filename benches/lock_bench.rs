use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use mantisdb_lock::lock::*;
use mantisdb_lock::LockManager;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TABLE: TableId = TableId(1);

fn page(page_no: u32) -> PageRef {
    PageRef::new(0, page_no, 1_024)
}

fn clust() -> IndexRef {
    IndexRef::clustered(1, TABLE)
}

fn bench_rec_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("rec_lock");
    group.sample_size(50);

    // Same-mode locks on one page share a single lock struct.
    group.bench_function("x_1k_records_one_page", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let trx = mgr.begin_trx(TrxOptions::default());
                mgr.lock_table(trx, TABLE, LockMode::IX).unwrap();
                (mgr, trx)
            },
            |(mgr, trx)| {
                for heap_no in PAGE_HEAP_NO_USER_LOW..PAGE_HEAP_NO_USER_LOW + 1_000 {
                    let status = mgr
                        .lock_rec(trx, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(1), heap_no, clust())
                        .unwrap();
                    black_box(status);
                }
                mgr.commit_trx(trx).unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("s_shared_by_16_trx", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let trxs: Vec<TrxId> = (0..16).map(|_| mgr.begin_trx(TrxOptions::default())).collect();
                for &trx in &trxs {
                    mgr.lock_table(trx, TABLE, LockMode::IS).unwrap();
                }
                (mgr, trxs)
            },
            |(mgr, trxs)| {
                for heap_no in PAGE_HEAP_NO_USER_LOW..PAGE_HEAP_NO_USER_LOW + 64 {
                    for &trx in &trxs {
                        black_box(
                            mgr.lock_rec(trx, LockMode::S, RecordLockFlags::empty(), page(1), heap_no, clust())
                                .unwrap(),
                        );
                    }
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("release");
    group.sample_size(50);

    group.bench_function("commit_with_10k_rows_over_100_pages", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let trx = mgr.begin_trx(TrxOptions::default());
                mgr.lock_table(trx, TABLE, LockMode::IX).unwrap();
                for page_no in 0..100 {
                    for heap_no in PAGE_HEAP_NO_USER_LOW..PAGE_HEAP_NO_USER_LOW + 100 {
                        mgr.lock_rec(trx, LockMode::X, RecordLockFlags::empty(), page(page_no), heap_no, clust())
                            .unwrap();
                    }
                }
                (mgr, trx)
            },
            |(mgr, trx)| mgr.commit_trx(trx).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("commit_grants_waiters", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let owner = mgr.begin_trx(TrxOptions::default());
                mgr.lock_rec(owner, LockMode::X, RecordLockFlags::empty(), page(1), 5, clust())
                    .unwrap();
                for _ in 0..32 {
                    let waiter = mgr.begin_trx(TrxOptions::default());
                    mgr.lock_rec(waiter, LockMode::S, RecordLockFlags::empty(), page(1), 5, clust())
                        .unwrap();
                }
                (mgr, owner)
            },
            |(mgr, owner)| mgr.commit_trx(owner).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_table_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lock");
    group.sample_size(50);

    group.bench_function("ix_100_trx_100_tables", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let trxs: Vec<TrxId> = (0..100).map(|_| mgr.begin_trx(TrxOptions::default())).collect();
                (mgr, trxs)
            },
            |(mgr, trxs)| {
                for &trx in &trxs {
                    for table in 0..100 {
                        black_box(mgr.lock_table(trx, TableId(table), LockMode::IX).unwrap());
                    }
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_deadlock_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("deadlock_search");
    group.sample_size(30);

    // Each new waiter searches the whole waits-for chain built so far.
    group.bench_function("chain_of_100_waiters", |b| {
        b.iter_batched(
            || {
                let mgr = LockManager::new();
                let trxs: Vec<TrxId> = (0..100).map(|_| mgr.begin_trx(TrxOptions::default())).collect();
                for (i, &trx) in trxs.iter().enumerate() {
                    mgr.lock_rec(trx, LockMode::X, RecordLockFlags::empty(), page(2), PAGE_HEAP_NO_USER_LOW + i, clust())
                        .unwrap();
                }
                (mgr, trxs)
            },
            |(mgr, trxs)| {
                for i in (0..trxs.len() - 1).rev() {
                    black_box(
                        mgr.lock_rec(trxs[i], LockMode::X, RecordLockFlags::empty(), page(2), PAGE_HEAP_NO_USER_LOW + i + 1, clust())
                            .unwrap(),
                    );
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(30);

    // Single-threaded random transactions on disjoint rows: no waits.
    group.bench_function("random_uncontended_trx", |b| {
        b.iter_batched(
            || (LockManager::new(), StdRng::seed_from_u64(42)),
            |(mgr, mut rng)| {
                for _ in 0..200 {
                    let trx = mgr.begin_trx(TrxOptions::default());
                    mgr.lock_table(trx, TABLE, LockMode::IX).unwrap();
                    for _ in 0..rng.gen_range(1..8) {
                        let page_no = rng.gen_range(0..16);
                        let heap_no = rng.gen_range(PAGE_HEAP_NO_USER_LOW..PAGE_HEAP_NO_USER_LOW + 500);
                        mgr.lock_rec(trx, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(page_no), heap_no, clust())
                            .unwrap();
                    }
                    mgr.commit_trx(trx).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_rec_lock,
    bench_release,
    bench_table_lock,
    bench_deadlock_search,
    bench_mixed
);
criterion_main!(benches);
