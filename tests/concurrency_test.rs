use mantisdb_lock::lock::*;
use mantisdb_lock::{Error, LockManager, LockSysConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const T1: TableId = TableId(1);

fn page() -> PageRef {
    PageRef::new(1, 10, 16)
}

fn clust() -> IndexRef {
    IndexRef::clustered(100, T1)
}

#[test]
fn test_suspended_thread_wakes_on_commit() {
    let mgr = Arc::new(LockManager::new());
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());
    mgr.lock_rec(a, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(), 5, clust())
        .unwrap();

    let waiter = {
        let mgr = Arc::clone(&mgr);
        thread::spawn(move || {
            let status = mgr
                .lock_rec(b, LockMode::S, RecordLockFlags::empty(), page(), 5, clust())
                .unwrap();
            assert_eq!(status, LockStatus::LockWait);
            mgr.suspend_until_granted(b, Some(Duration::from_secs(10)))
        })
    };

    while !mgr.is_waiting(b) {
        thread::sleep(Duration::from_millis(1));
    }
    mgr.commit_trx(a).unwrap();

    waiter.join().unwrap().unwrap();
    assert!(mgr.has_rec_lock(b, LockMode::S, RecordLockFlags::empty(), page().id, 5));
    assert_eq!(mgr.stats().grants_after_wait, 1);
    mgr.commit_trx(b).unwrap();
}

#[test]
fn test_suspended_victim_is_told_to_roll_back() {
    let mgr = Arc::new(LockManager::new());
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());
    mgr.lock_rec(a, LockMode::X, RecordLockFlags::empty(), page(), 3, clust())
        .unwrap();
    mgr.lock_rec(b, LockMode::X, RecordLockFlags::empty(), page(), 7, clust())
        .unwrap();
    mgr.set_undo_no(b, 500).unwrap();

    let victim = {
        let mgr = Arc::clone(&mgr);
        thread::spawn(move || {
            let status = mgr
                .lock_rec(a, LockMode::X, RecordLockFlags::empty(), page(), 7, clust())
                .unwrap();
            assert_eq!(status, LockStatus::LockWait);
            let result = mgr.suspend_until_granted(a, Some(Duration::from_secs(10)));
            mgr.rollback_trx(a).unwrap();
            result
        })
    };

    while !mgr.is_waiting(a) {
        thread::sleep(Duration::from_millis(1));
    }
    let status = mgr
        .lock_rec(b, LockMode::X, RecordLockFlags::empty(), page(), 3, clust())
        .unwrap();
    assert_eq!(status, LockStatus::LockWait);
    mgr.suspend_until_granted(b, Some(Duration::from_secs(10)))
        .unwrap();

    assert_eq!(victim.join().unwrap(), Err(Error::Deadlock { trx: a }));
    mgr.commit_trx(b).unwrap();
    mgr.validate().unwrap();
}

#[test]
fn test_cancelled_waiter_is_not_granted() {
    let mgr = Arc::new(LockManager::new());
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());
    mgr.lock_rec(a, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(), 5, clust())
        .unwrap();

    let waiter = {
        let mgr = Arc::clone(&mgr);
        thread::spawn(move || {
            let status = mgr
                .lock_rec(b, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(), 5, clust())
                .unwrap();
            assert_eq!(status, LockStatus::LockWait);
            mgr.suspend_until_granted(b, Some(Duration::from_secs(10)))
        })
    };

    while !mgr.is_waiting(b) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(mgr.cancel_wait(b).unwrap());

    assert_eq!(waiter.join().unwrap(), Err(Error::LockWaitCancelled { trx: b }));
    assert!(!mgr.has_rec_lock(b, LockMode::X, RecordLockFlags::REC_NOT_GAP, page().id, 5));
    assert_eq!(mgr.rec_queue(page().id, 5).len(), 1);
    // Reported once: the transaction may go on with other requests.
    mgr.suspend_until_granted(b, None).unwrap();
    assert!(mgr
        .lock_rec(b, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(), 6, clust())
        .unwrap()
        .is_granted());
    mgr.rollback_trx(b).unwrap();
    mgr.commit_trx(a).unwrap();
    mgr.validate().unwrap();
}

#[test]
fn test_waiter_ended_by_another_thread_is_cancelled() {
    let mgr = Arc::new(LockManager::new());
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());
    mgr.lock_rec(a, LockMode::X, RecordLockFlags::empty(), page(), 4, clust())
        .unwrap();

    let waiter = {
        let mgr = Arc::clone(&mgr);
        thread::spawn(move || {
            mgr.lock_rec(b, LockMode::S, RecordLockFlags::empty(), page(), 4, clust())
                .unwrap();
            mgr.suspend_until_granted(b, Some(Duration::from_secs(10)))
        })
    };

    while !mgr.is_waiting(b) {
        thread::sleep(Duration::from_millis(1));
    }
    // A kill handler rolls the waiting transaction back under its thread.
    mgr.rollback_trx(b).unwrap();

    assert_eq!(waiter.join().unwrap(), Err(Error::LockWaitCancelled { trx: b }));
    assert!(!mgr.trx_is_active(b));
    assert_eq!(mgr.rec_queue(page().id, 4).len(), 1);
    mgr.commit_trx(a).unwrap();
}

/// Random short transactions on a handful of hot rows. Every transaction
/// either commits or is rolled back after a deadlock or timeout; nothing may
/// be left behind.
#[test]
fn test_random_workload_drains() {
    let config = LockSysConfig {
        lock_wait_timeout_ms: 2_000,
        ..LockSysConfig::default()
    };
    let mgr = Arc::new(LockManager::with_config(config).unwrap());
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let mut committed = 0;
                for _ in 0..200 {
                    let trx = mgr.begin_trx(TrxOptions::default());
                    let mut ok = mgr.lock_table(trx, T1, LockMode::IX).is_ok();
                    for _ in 0..rng.gen_range(1..5) {
                        if !ok {
                            break;
                        }
                        let heap_no = rng.gen_range(2..8);
                        let mode = if rng.gen_bool(0.5) { LockMode::S } else { LockMode::X };
                        ok = match mgr.lock_rec(trx, mode, RecordLockFlags::empty(), page(), heap_no, clust()) {
                            Ok(LockStatus::LockWait) => mgr.suspend_until_granted(trx, None).is_ok(),
                            Ok(_) => true,
                            Err(err) => {
                                assert!(err.is_rollback_required());
                                false
                            }
                        };
                    }
                    if ok {
                        mgr.commit_trx(trx).unwrap();
                        committed += 1;
                    } else {
                        mgr.rollback_trx(trx).unwrap();
                    }
                }
                committed
            })
        })
        .collect();

    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(committed > 0);
    assert!(mgr.rec_queue(page().id, 2).is_empty());
    assert!(mgr.lock_snapshot().is_empty());
    mgr.validate().unwrap();
}
