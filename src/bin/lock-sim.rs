//! Lock manager simulator
//!
//! Runs random row-locking transactions from several threads against one
//! `LockManager`, retries deadlock victims and prints the lock statistics
//! as JSON.
//!
//! Usage:
//!   lock-sim [threads] [transactions-per-thread] [hot-rows]
//!
//! Lock system knobs are read from the `MANTIS_LOCK_*` environment variables.

use anyhow::{Context, Result};
use mantisdb_lock::lock::*;
use mantisdb_lock::{Error, LockManager, LockSysConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TABLE: TableId = TableId(1);
const MAX_RETRIES: usize = 10;

#[derive(Debug, Clone, Copy)]
struct SimConfig {
    threads: usize,
    trxs_per_thread: usize,
    hot_rows: usize,
}

#[derive(Debug, Default, Serialize)]
struct WorkerReport {
    committed: u64,
    deadlock_retries: u64,
    timeout_retries: u64,
    cancelled_retries: u64,
    gave_up: u64,
}

#[derive(Serialize)]
struct SimReport {
    threads: usize,
    elapsed_ms: u128,
    committed: u64,
    deadlock_retries: u64,
    timeout_retries: u64,
    cancelled_retries: u64,
    gave_up: u64,
    stats: mantisdb_lock::LockStatsSnapshot,
}

fn parse_arg(args: &[String], pos: usize, default: usize) -> Result<usize> {
    match args.get(pos) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("argument {} is not a number: {}", pos, raw)),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lock_sim=info,mantisdb_lock=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let sim = SimConfig {
        threads: parse_arg(&args, 1, num_cpus::get())?,
        trxs_per_thread: parse_arg(&args, 2, 1_000)?,
        hot_rows: parse_arg(&args, 3, 32)?.max(1),
    };
    let config = LockSysConfig::from_env().context("invalid lock system configuration")?;
    info!(?sim, ?config, "starting lock simulation");

    let mgr = Arc::new(LockManager::with_config(config)?);
    let start = Instant::now();
    let handles: Vec<_> = (0..sim.threads)
        .map(|worker| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || run_worker(&mgr, sim, worker as u64))
        })
        .collect();

    let mut total = WorkerReport::default();
    for handle in handles {
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
        total.committed += report.committed;
        total.deadlock_retries += report.deadlock_retries;
        total.timeout_retries += report.timeout_retries;
        total.cancelled_retries += report.cancelled_retries;
        total.gave_up += report.gave_up;
    }

    mgr.validate()?;
    let report = SimReport {
        threads: sim.threads,
        elapsed_ms: start.elapsed().as_millis(),
        committed: total.committed,
        deadlock_retries: total.deadlock_retries,
        timeout_retries: total.timeout_retries,
        cancelled_retries: total.cancelled_retries,
        gave_up: total.gave_up,
        stats: mgr.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(deadlock) = mgr.last_deadlock() {
        info!("last deadlock:\n{}", deadlock.to_text());
    }
    Ok(())
}

fn run_worker(mgr: &LockManager, sim: SimConfig, seed: u64) -> WorkerReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = WorkerReport::default();
    let index = IndexRef::clustered(1, TABLE);

    for _ in 0..sim.trxs_per_thread {
        // Rows a transaction touches: a few random hot rows, each with a mode.
        let rows: Vec<(usize, LockMode)> = (0..rng.gen_range(1..=4))
            .map(|_| {
                let row = rng.gen_range(0..sim.hot_rows);
                let mode = if rng.gen_bool(0.3) { LockMode::S } else { LockMode::X };
                (row, mode)
            })
            .collect();

        let mut attempt = 0;
        loop {
            match run_trx(mgr, index, &rows) {
                Ok(()) => {
                    report.committed += 1;
                    break;
                }
                Err(Error::Deadlock { .. }) => report.deadlock_retries += 1,
                Err(Error::LockWaitTimeout { .. }) => report.timeout_retries += 1,
                Err(Error::LockWaitCancelled { .. }) => report.cancelled_retries += 1,
                Err(err) => {
                    warn!(error = %err, "transaction failed");
                    report.gave_up += 1;
                    break;
                }
            }
            attempt += 1;
            if attempt >= MAX_RETRIES {
                report.gave_up += 1;
                break;
            }
        }
    }
    report
}

/// Rows map to pages of 100 records; heap numbers start after the sentinels.
fn row_position(row: usize) -> (PageRef, HeapNo) {
    let page_no = (row / 100) as u32;
    (
        PageRef::new(0, page_no, 100 + PAGE_HEAP_NO_USER_LOW),
        PAGE_HEAP_NO_USER_LOW + row % 100,
    )
}

fn run_trx(mgr: &LockManager, index: IndexRef, rows: &[(usize, LockMode)]) -> mantisdb_lock::Result<()> {
    let trx = mgr.begin_trx(TrxOptions::default());
    let result = lock_rows(mgr, trx, index, rows);
    match result {
        Ok(()) => mgr.commit_trx(trx),
        Err(err) => {
            mgr.rollback_trx(trx)?;
            Err(err)
        }
    }
}

fn lock_rows(mgr: &LockManager, trx: TrxId, index: IndexRef, rows: &[(usize, LockMode)]) -> mantisdb_lock::Result<()> {
    wait_if_needed(mgr, trx, mgr.lock_table(trx, TABLE, LockMode::IX)?)?;
    for &(row, mode) in rows {
        let (page, heap_no) = row_position(row);
        let status = mgr.clust_rec_read_check_and_lock(
            GuardFlags::empty(),
            page,
            heap_no,
            index,
            mode,
            RecordLockFlags::REC_NOT_GAP,
            trx,
            TrxId(0),
        )?;
        wait_if_needed(mgr, trx, status)?;
    }
    Ok(())
}

fn wait_if_needed(mgr: &LockManager, trx: TrxId, status: LockStatus) -> mantisdb_lock::Result<()> {
    match status {
        LockStatus::LockWait => mgr.suspend_until_granted(trx, None),
        _ => Ok(()),
    }
}
