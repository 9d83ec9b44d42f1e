use mantisdb_lock::lock::*;
use mantisdb_lock::{Error, LockManager};
use proptest::prelude::*;

const SLOTS: usize = 4;
const HEAPS: std::ops::Range<usize> = 2..7;

fn page() -> PageRef {
    PageRef::new(0, 1, 8)
}

fn clust() -> IndexRef {
    IndexRef::clustered(1, TableId(1))
}

#[derive(Debug, Clone)]
enum Op {
    Lock {
        slot: usize,
        heap_no: usize,
        exclusive: bool,
        flags: u8,
    },
    Commit {
        slot: usize,
    },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SLOTS, HEAPS, any::<bool>(), 0u8..3).prop_map(|(slot, heap_no, exclusive, flags)| Op::Lock {
            slot,
            heap_no,
            exclusive,
            flags,
        }),
        1 => (0..SLOTS).prop_map(|slot| Op::Commit { slot }),
    ]
}

fn flags_of(code: u8) -> RecordLockFlags {
    match code {
        0 => RecordLockFlags::empty(),
        1 => RecordLockFlags::GAP,
        _ => RecordLockFlags::REC_NOT_GAP,
    }
}

/// Granted locks of different transactions that cover the record itself
/// must be compatible.
fn assert_mutual_exclusion(mgr: &LockManager) -> Result<(), TestCaseError> {
    for heap_no in HEAPS {
        let granted: Vec<(TrxId, LockRequest)> = mgr
            .rec_queue(page().id, heap_no)
            .into_iter()
            .filter(|(_, req)| !req.is_waiting() && !req.is_gap() && !req.is_insert_intention())
            .collect();
        for (i, (t1, r1)) in granted.iter().enumerate() {
            for (t2, r2) in &granted[i + 1..] {
                if t1 != t2 {
                    prop_assert!(
                        compatible(r1.mode, r2.mode),
                        "{} {} and {} {} both granted on heap no {}",
                        t1,
                        r1.mode_string(),
                        t2,
                        r2.mode_string(),
                        heap_no
                    );
                }
            }
        }
    }
    Ok(())
}

/// Checks on slots whose wait ended while another transaction ran: either
/// granted, or rolled back as a deadlock victim.
fn settle(mgr: &LockManager, trxs: &mut [TrxId]) {
    for trx in trxs.iter_mut() {
        if mgr.is_waiting(*trx) {
            continue;
        }
        if let Err(Error::Deadlock { .. }) = mgr.suspend_until_granted(*trx, None) {
            mgr.rollback_trx(*trx).unwrap();
            *trx = mgr.begin_trx(TrxOptions::default());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_granted_locks_are_compatible_and_fifo(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mgr = LockManager::new();
        let mut trxs: Vec<TrxId> = (0..SLOTS).map(|_| mgr.begin_trx(TrxOptions::default())).collect();

        for op in ops {
            match op {
                Op::Lock { slot, heap_no, exclusive, flags } => {
                    let trx = trxs[slot];
                    if mgr.is_waiting(trx) {
                        continue;
                    }
                    let mode = if exclusive { LockMode::X } else { LockMode::S };
                    let flags = flags_of(flags);

                    // A conflicting waiter of another transaction ahead in the
                    // queue must not be overtaken.
                    let covered = mgr.has_rec_lock(trx, mode, flags, page().id, heap_no);
                    let must_queue = !covered
                        && !flags.contains(RecordLockFlags::GAP)
                        && mgr.rec_queue(page().id, heap_no).iter().any(|(owner, req)| {
                            *owner != trx && req.is_waiting() && !compatible(mode, req.mode)
                        });

                    match mgr.lock_rec(trx, mode, flags, page(), heap_no, clust()) {
                        Ok(status) => {
                            if must_queue {
                                prop_assert_eq!(status, LockStatus::LockWait);
                            }
                        }
                        Err(Error::Deadlock { trx: victim }) => {
                            prop_assert_eq!(victim, trx);
                            mgr.rollback_trx(trx).unwrap();
                            trxs[slot] = mgr.begin_trx(TrxOptions::default());
                        }
                        Err(other) => prop_assert!(false, "unexpected error {}", other),
                    }
                }
                Op::Commit { slot } => {
                    let trx = trxs[slot];
                    if mgr.is_waiting(trx) {
                        continue;
                    }
                    mgr.commit_trx(trx).unwrap();
                    trxs[slot] = mgr.begin_trx(TrxOptions::default());
                }
            }
            settle(&mgr, &mut trxs);
            assert_mutual_exclusion(&mgr)?;
            prop_assert!(mgr.validate().is_ok());
        }

        // Liveness: committing runnable transactions eventually drains
        // every queue.
        let mut remaining = trxs;
        while !remaining.is_empty() {
            let runnable = remaining.iter().position(|&trx| !mgr.is_waiting(trx));
            prop_assert!(runnable.is_some(), "every remaining transaction waits");
            if let Some(pos) = runnable {
                let trx = remaining.swap_remove(pos);
                match mgr.suspend_until_granted(trx, None) {
                    Err(Error::Deadlock { .. }) => mgr.rollback_trx(trx).unwrap(),
                    _ => mgr.commit_trx(trx).unwrap(),
                }
            }
        }
        for heap_no in HEAPS {
            prop_assert!(mgr.rec_queue(page().id, heap_no).is_empty());
        }
    }
}
