// Lock table state guarded by the lock-table mutex
use super::bitmap::LockBitmap;
use super::compat;
use super::deadlock::DeadlockReport;
use super::trx::{TrxLocks, WaitOutcome};
use super::types::*;
use crate::config::LockSysConfig;
use crate::stats::LockStats;
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Record-lock specific part of a lock object.
#[derive(Debug, Clone)]
pub(crate) struct RecLock {
    pub index: IndexRef,
    pub page: PageId,
    pub bits: LockBitmap,
}

#[derive(Debug, Clone)]
pub(crate) enum LockTarget {
    Record(RecLock),
    Table(TableId),
}

/// One lock object: all locks of one transaction in one mode on one page
/// (record lock) or on one table (table lock).
#[derive(Debug, Clone)]
pub(crate) struct Lock {
    pub id: LockId,
    pub trx: TrxId,
    pub mode: LockMode,
    pub flags: RecordLockFlags,
    pub target: LockTarget,
}

impl Lock {
    pub fn kind(&self) -> LockKind {
        match self.target {
            LockTarget::Record(_) => LockKind::Record,
            LockTarget::Table(_) => LockKind::Table,
        }
    }

    pub fn request(&self) -> LockRequest {
        LockRequest {
            kind: self.kind(),
            mode: self.mode,
            flags: self.flags,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.flags.contains(RecordLockFlags::WAIT)
    }

    pub fn is_gap(&self) -> bool {
        self.flags.contains(RecordLockFlags::GAP)
    }

    pub fn is_rec_not_gap(&self) -> bool {
        self.flags.contains(RecordLockFlags::REC_NOT_GAP)
    }

    pub fn is_insert_intention(&self) -> bool {
        self.flags.contains(RecordLockFlags::INSERT_INTENTION)
    }

    pub fn rec(&self) -> Option<&RecLock> {
        match &self.target {
            LockTarget::Record(rec) => Some(rec),
            LockTarget::Table(_) => None,
        }
    }

    pub fn rec_mut(&mut self) -> Option<&mut RecLock> {
        match &mut self.target {
            LockTarget::Record(rec) => Some(rec),
            LockTarget::Table(_) => None,
        }
    }

    /// Table the lock belongs to; record locks report their index's table.
    pub fn table_id(&self) -> TableId {
        match &self.target {
            LockTarget::Record(rec) => rec.index.table,
            LockTarget::Table(table) => *table,
        }
    }

    pub fn has_bit(&self, heap_no: HeapNo) -> bool {
        self.rec().map_or(false, |rec| rec.bits.get(heap_no))
    }

    pub fn n_bits(&self) -> usize {
        self.rec().map_or(0, |rec| rec.bits.n_bits())
    }
}

/// Lock queue of one table, in arrival order.
#[derive(Debug, Default)]
pub(crate) struct TableQueue {
    pub locks: Vec<LockId>,
    /// Owner of the table's single granted AUTO_INC slot.
    pub autoinc_trx: Option<TrxId>,
    pub n_waiting_or_granted_auto_inc: usize,
}

pub(crate) struct LockSys {
    pub config: LockSysConfig,
    pub stats: Arc<LockStats>,
    pub locks: AHashMap<LockId, Lock>,
    next_lock_id: u64,
    /// Record locks per page, in arrival order.
    pub rec_hash: AHashMap<PageId, Vec<LockId>>,
    pub tables: AHashMap<TableId, TableQueue>,
    pub trxs: BTreeMap<TrxId, TrxLocks>,
    /// Next transaction id to hand out; every id seen on a record must be below it.
    pub next_trx_id: u64,
    pub last_deadlock: Option<DeadlockReport>,
}

impl LockSys {
    pub fn new(config: LockSysConfig, stats: Arc<LockStats>) -> Self {
        LockSys {
            config,
            stats,
            locks: AHashMap::new(),
            next_lock_id: 1,
            rec_hash: AHashMap::new(),
            tables: AHashMap::new(),
            trxs: BTreeMap::new(),
            next_trx_id: 1,
            last_deadlock: None,
        }
    }

    pub fn lock(&self, id: LockId) -> &Lock {
        match self.locks.get(&id) {
            Some(lock) => lock,
            None => fatal(format!("{} is not in the lock table", id)),
        }
    }

    pub fn lock_mut(&mut self, id: LockId) -> &mut Lock {
        match self.locks.get_mut(&id) {
            Some(lock) => lock,
            None => fatal(format!("{} is not in the lock table", id)),
        }
    }

    pub fn trx(&self, id: TrxId) -> &TrxLocks {
        match self.trxs.get(&id) {
            Some(trx) => trx,
            None => fatal(format!("{} is not registered with the lock system", id)),
        }
    }

    pub fn trx_mut(&mut self, id: TrxId) -> &mut TrxLocks {
        match self.trxs.get_mut(&id) {
            Some(trx) => trx,
            None => fatal(format!("{} is not registered with the lock system", id)),
        }
    }

    /// Registered and not yet committing or rolling back.
    pub fn trx_is_active(&self, id: TrxId) -> bool {
        self.trxs.get(&id).map_or(false, |t| !t.releasing)
    }

    /// Smallest id among registered transactions, or the next id if none.
    pub fn min_active_trx_id(&self) -> TrxId {
        self.trxs
            .keys()
            .next()
            .copied()
            .unwrap_or(TrxId(self.next_trx_id))
    }

    /// Puts a new lock object into the arena and the owner's lock list.
    pub fn alloc_lock(
        &mut self,
        trx: TrxId,
        mode: LockMode,
        flags: RecordLockFlags,
        target: LockTarget,
    ) -> LockId {
        let id = LockId(self.next_lock_id);
        self.next_lock_id += 1;
        self.locks.insert(
            id,
            Lock {
                id,
                trx,
                mode,
                flags,
                target,
            },
        );
        self.trx_mut(trx).locks.push(id);
        id
    }

    /// Removes a lock object from the arena and from its owner's list.
    /// Queue membership must already be gone.
    pub fn free_lock(&mut self, id: LockId) -> Lock {
        let lock = match self.locks.remove(&id) {
            Some(lock) => lock,
            None => fatal(format!("{} freed twice", id)),
        };
        if let Some(trx) = self.trxs.get_mut(&lock.trx) {
            trx.remove_lock(id);
            debug_assert_ne!(trx.wait_lock, Some(id), "freeing the wait lock of {}", trx.id);
        }
        lock
    }

    /// Marks the lock as waiting and makes it its owner's wait lock.
    pub fn set_lock_and_trx_wait(&mut self, id: LockId) {
        let trx_id = {
            let lock = self.lock_mut(id);
            lock.flags.insert(RecordLockFlags::WAIT);
            lock.trx
        };
        let trx = self.trx_mut(trx_id);
        debug_assert!(trx.wait_lock.is_none(), "{} already waits", trx_id);
        trx.wait_lock = Some(id);
    }

    /// Clears the WAIT flag and the owner's wait pointer.
    pub fn reset_lock_and_trx_wait(&mut self, id: LockId) {
        let trx_id = {
            let lock = self.lock_mut(id);
            lock.flags.remove(RecordLockFlags::WAIT);
            lock.trx
        };
        if let Some(trx) = self.trxs.get_mut(&trx_id) {
            if trx.wait_lock == Some(id) {
                trx.wait_lock = None;
            }
        }
    }

    /// Ends the lock wait of a suspended transaction and wakes its thread.
    pub fn end_lock_wait(&mut self, trx_id: TrxId) {
        if let Some(trx) = self.trxs.get_mut(&trx_id) {
            trx.que_state = TrxQueState::Running;
            trx.wait_started = None;
            trx.wakeup.notify_all();
        }
    }

    pub fn set_wait_outcome(&mut self, trx_id: TrxId, outcome: WaitOutcome) {
        if let Some(trx) = self.trxs.get_mut(&trx_id) {
            trx.wait_outcome = Some(outcome);
        }
    }

    /// The wait of `trx_id` was cancelled: its request is already gone.
    pub fn wait_cancelled(&mut self, trx_id: TrxId) {
        self.set_wait_outcome(trx_id, WaitOutcome::Cancelled);
        self.stats.record_cancelled_wait();
        self.end_lock_wait(trx_id);
    }

    /// Whether `lock1` (a request) must wait for `lock2`, which is ahead of it
    /// in the same queue.
    pub fn has_to_wait(&self, lock1: &Lock, lock2: &Lock) -> bool {
        if lock1.trx == lock2.trx || compat::compatible(lock1.mode, lock2.mode) {
            return false;
        }
        match lock1.kind() {
            LockKind::Table => true,
            LockKind::Record => rec_has_to_wait(
                lock1.trx,
                lock1.mode,
                lock1.flags,
                lock2,
                lock1.has_bit(PAGE_HEAP_NO_SUPREMUM),
            ),
        }
    }

    /// Every lock blocking `wait_lock` that arrived before it, in queue order.
    pub fn blockers_of(&self, wait_lock: LockId) -> Vec<LockId> {
        let wait = self.lock(wait_lock);
        let queue: &[LockId] = match &wait.target {
            LockTarget::Record(rec) => self
                .rec_hash
                .get(&rec.page)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
            LockTarget::Table(table) => self
                .tables
                .get(table)
                .map(|q| q.locks.as_slice())
                .unwrap_or(&[]),
        };
        let heap_no = wait.rec().and_then(|rec| rec.bits.first_set());

        let mut blockers = Vec::new();
        for &id in queue {
            if id == wait_lock {
                break;
            }
            let other = self.lock(id);
            if let Some(heap_no) = heap_no {
                if !other.has_bit(heap_no) {
                    continue;
                }
            }
            if self.has_to_wait(wait, other) {
                blockers.push(id);
            }
        }
        blockers
    }
}

/// Next-key locking refinement of the mode compatibility test: does a
/// request by `trx` for `mode`/`flags` have to wait for `lock2`?
pub(crate) fn rec_has_to_wait(
    trx: TrxId,
    mode: LockMode,
    flags: RecordLockFlags,
    lock2: &Lock,
    on_supremum: bool,
) -> bool {
    if trx == lock2.trx || compat::compatible(mode, lock2.mode) {
        return false;
    }
    let insert_intention = flags.contains(RecordLockFlags::INSERT_INTENTION);

    // Gap requests never wait: gap locks of different transactions can
    // coexist, they only stop inserts.
    if (on_supremum || flags.contains(RecordLockFlags::GAP)) && !insert_intention {
        return false;
    }
    // A record lock does not wait for a pure gap lock.
    if !insert_intention && lock2.is_gap() {
        return false;
    }
    // A gap request does not wait for a record-only lock.
    if flags.contains(RecordLockFlags::GAP) && lock2.is_rec_not_gap() {
        return false;
    }
    // Nobody waits for an insert intention.
    if lock2.is_insert_intention() {
        return false;
    }
    true
}

/// Lock-table corruption is not recoverable: log everything and abort.
#[track_caller]
pub(crate) fn fatal(msg: String) -> ! {
    tracing::error!(target: "mantisdb_lock", "lock system corrupted: {}", msg);
    panic!("lock system corrupted: {}", msg);
}

#[cfg(test)]
impl LockSys {
    pub fn for_test(config: LockSysConfig) -> Self {
        LockSys::new(config, Arc::new(LockStats::new()))
    }

    pub fn begin_test_trx(&mut self) -> TrxId {
        let id = TrxId(self.next_trx_id);
        self.next_trx_id += 1;
        self.trxs.insert(id, TrxLocks::new(id, TrxOptions::default()));
        id
    }
}
