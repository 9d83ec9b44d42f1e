use mantisdb_lock::lock::*;
use mantisdb_lock::{Error, LockManager, LockSysConfig};

const T1: TableId = TableId(1);

fn page() -> PageRef {
    PageRef::new(1, 10, 16)
}

fn clust() -> IndexRef {
    IndexRef::clustered(100, T1)
}

fn big_page() -> PageRef {
    PageRef::new(1, 20, 400)
}

fn lock_x(mgr: &LockManager, trx: TrxId, page: PageRef, heap_no: HeapNo) -> mantisdb_lock::Result<LockStatus> {
    mgr.lock_rec(trx, LockMode::X, RecordLockFlags::empty(), page, heap_no, clust())
}

#[test]
fn test_two_cycle_requester_is_victim() {
    let mgr = LockManager::new();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());

    assert!(lock_x(&mgr, a, page(), 3).unwrap().is_granted());
    assert!(lock_x(&mgr, b, page(), 7).unwrap().is_granted());
    assert_eq!(lock_x(&mgr, a, page(), 7).unwrap(), LockStatus::LockWait);

    // Equal work: the younger requester is rolled back.
    let err = lock_x(&mgr, b, page(), 3).unwrap_err();
    assert_eq!(err, Error::Deadlock { trx: b });
    assert!(err.is_rollback_required());
    assert!(!mgr.is_waiting(b));
    assert!(mgr.is_waiting(a));

    let report = mgr.last_deadlock().unwrap();
    assert_eq!(report.victim, b);
    assert!(!report.exceeded_bounds);
    assert!(mgr.print_info_summary().contains("LATEST DETECTED DEADLOCK"));
    assert_eq!(mgr.stats().deadlocks, 1);
    mgr.validate().unwrap();

    mgr.rollback_trx(b).unwrap();
    assert!(!mgr.is_waiting(a));
    mgr.commit_trx(a).unwrap();
    mgr.validate().unwrap();
}

#[test]
fn test_two_cycle_lighter_other_is_victim() {
    let mgr = LockManager::new();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());

    lock_x(&mgr, a, page(), 3).unwrap();
    lock_x(&mgr, b, page(), 7).unwrap();
    assert_eq!(lock_x(&mgr, a, page(), 7).unwrap(), LockStatus::LockWait);

    mgr.set_undo_no(b, 1_000).unwrap();
    // B did more work: A's wait is cancelled and B queues behind A's lock.
    assert_eq!(lock_x(&mgr, b, page(), 3).unwrap(), LockStatus::LockWait);
    assert!(!mgr.is_waiting(a));
    assert_eq!(
        mgr.suspend_until_granted(a, None).unwrap_err(),
        Error::Deadlock { trx: a }
    );
    assert_eq!(mgr.last_deadlock().unwrap().victim, a);
    assert_eq!(mgr.stats().victims_other, 1);

    mgr.rollback_trx(a).unwrap();
    assert!(!mgr.is_waiting(b));
    mgr.validate().unwrap();
}

#[test]
fn test_non_transactional_trx_is_never_victim() {
    let mgr = LockManager::new();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions {
        modified_non_transactional: true,
        ..TrxOptions::default()
    });

    lock_x(&mgr, a, page(), 3).unwrap();
    lock_x(&mgr, b, page(), 7).unwrap();
    mgr.set_undo_no(a, 1_000_000).unwrap();
    assert_eq!(lock_x(&mgr, b, page(), 3).unwrap(), LockStatus::LockWait);

    // A is far heavier by work, but B cannot be rolled back cleanly.
    assert_eq!(
        lock_x(&mgr, a, page(), 7).unwrap_err(),
        Error::Deadlock { trx: a }
    );
}

fn n_cycle(n: usize) {
    let mgr = LockManager::new();
    let trxs: Vec<TrxId> = (0..n).map(|_| mgr.begin_trx(TrxOptions::default())).collect();
    for (i, &trx) in trxs.iter().enumerate() {
        assert!(lock_x(&mgr, trx, big_page(), 2 + i).unwrap().is_granted());
    }
    for (i, &trx) in trxs.iter().enumerate().take(n - 1) {
        assert_eq!(lock_x(&mgr, trx, big_page(), 3 + i).unwrap(), LockStatus::LockWait);
    }

    let last = trxs[n - 1];
    assert_eq!(
        lock_x(&mgr, last, big_page(), 2).unwrap_err(),
        Error::Deadlock { trx: last }
    );
    let report = mgr.last_deadlock().unwrap();
    assert_eq!(report.victim, last);
    assert_eq!(report.participants.len(), n);
    // Exactly one transaction gave up its wait.
    for &trx in &trxs[..n - 1] {
        assert!(mgr.is_waiting(trx));
    }
    mgr.validate().unwrap();

    // Unwinding the chain grants every waiter in turn.
    mgr.rollback_trx(last).unwrap();
    for &trx in trxs[..n - 1].iter().rev() {
        assert!(!mgr.is_waiting(trx));
        mgr.commit_trx(trx).unwrap();
    }
    assert_eq!(mgr.stats().deadlocks, 1);
}

#[test]
fn test_three_cycle() {
    n_cycle(3);
}

#[test]
fn test_long_cycle_within_bounds() {
    n_cycle(200);
}

#[test]
fn test_chain_beyond_max_depth_rolls_back_requester() {
    let mgr = LockManager::new();
    let n = 250;
    let trxs: Vec<TrxId> = (0..n).map(|_| mgr.begin_trx(TrxOptions::default())).collect();
    for (i, &trx) in trxs.iter().enumerate() {
        lock_x(&mgr, trx, big_page(), 2 + i).unwrap();
    }

    // Grow the waits-for chain from its tail so every new request has to
    // search the whole chain.
    let mut victims = Vec::new();
    for i in (0..n - 1).rev() {
        match lock_x(&mgr, trxs[i], big_page(), 3 + i) {
            Ok(status) => assert_eq!(status, LockStatus::LockWait),
            Err(Error::Deadlock { trx }) => victims.push(trx),
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    assert!(!victims.is_empty());
    assert!(mgr.stats().search_bound_exceeded >= 1);
    assert!(mgr.last_deadlock().unwrap().exceeded_bounds);
    mgr.validate().unwrap();
}

#[test]
fn test_detection_disabled_leaves_cycle_to_timeout() {
    let config = LockSysConfig {
        deadlock_detect: false,
        ..LockSysConfig::default()
    };
    let mgr = LockManager::with_config(config).unwrap();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());

    lock_x(&mgr, a, page(), 3).unwrap();
    lock_x(&mgr, b, page(), 7).unwrap();
    assert_eq!(lock_x(&mgr, a, page(), 7).unwrap(), LockStatus::LockWait);
    assert_eq!(lock_x(&mgr, b, page(), 3).unwrap(), LockStatus::LockWait);
    assert!(mgr.last_deadlock().is_none());

    let err = mgr
        .suspend_until_granted(b, Some(std::time::Duration::from_millis(10)))
        .unwrap_err();
    assert_eq!(err, Error::LockWaitTimeout { trx: b });
    assert!(!mgr.is_waiting(b));
    assert_eq!(mgr.suspend_until_granted(b, None), Ok(()));
    mgr.rollback_trx(b).unwrap();
    assert!(!mgr.is_waiting(a));
}

#[test]
fn test_table_lock_deadlock() {
    let mgr = LockManager::new();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());
    let (t1, t2) = (TableId(1), TableId(2));

    mgr.lock_table(a, t1, LockMode::X).unwrap();
    mgr.lock_table(b, t2, LockMode::X).unwrap();
    assert_eq!(mgr.lock_table(a, t2, LockMode::S).unwrap(), LockStatus::LockWait);
    assert_eq!(
        mgr.lock_table(b, t1, LockMode::S).unwrap_err(),
        Error::Deadlock { trx: b }
    );
    assert!(!mgr.has_table_lock(b, t1, LockMode::IS));
    mgr.validate().unwrap();
}

#[test]
fn test_requester_granted_when_other_victim_rolls_back() {
    let mgr = LockManager::new();
    let a = mgr.begin_trx(TrxOptions::default());
    let b = mgr.begin_trx(TrxOptions::default());

    mgr.lock_rec(b, LockMode::X, RecordLockFlags::REC_NOT_GAP, page(), 7, clust())
        .unwrap();
    assert_eq!(lock_x(&mgr, a, page(), 7).unwrap(), LockStatus::LockWait);
    mgr.set_undo_no(b, 1_000).unwrap();

    // B queues behind A's waiting next-key request, closing a cycle. A is
    // lighter, so its wait is cancelled and B's request goes through.
    assert_eq!(lock_x(&mgr, b, page(), 7).unwrap(), LockStatus::SuccessLockedRec);
    assert!(!mgr.is_waiting(b));
    assert!(mgr.has_rec_lock(b, LockMode::X, RecordLockFlags::empty(), page().id, 7));
    assert_eq!(
        mgr.suspend_until_granted(a, None).unwrap_err(),
        Error::Deadlock { trx: a }
    );
    assert_eq!(mgr.last_deadlock().unwrap().victim, a);
    mgr.validate().unwrap();

    mgr.rollback_trx(a).unwrap();
    mgr.commit_trx(b).unwrap();
    assert!(mgr.lock_snapshot().is_empty());
}
