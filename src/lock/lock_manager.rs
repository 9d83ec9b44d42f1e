// Lock Manager
//
// Public face of the lock system. Every call takes the single lock-table
// mutex for its whole duration; nothing here runs on threads of its own.
use super::deadlock::DeadlockReport;
use super::lock_sys::LockSys;
use super::print::{LockInfo, LockWaitInfo};
use super::trx::{TrxLocks, WaitOutcome};
use super::types::*;
use crate::config::LockSysConfig;
use crate::error::{Error, Result};
use crate::stats::{LockStats, LockStatsSnapshot};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transactions printed between two yields of the mutex in the status dump.
const PRINT_TRX_BATCH: usize = 64;

pub struct LockManager {
    sys: Mutex<LockSys>,
    stats: Arc<LockStats>,
    config: LockSysConfig,
}

impl LockManager {
    pub fn new() -> Self {
        let config = LockSysConfig::default();
        let stats = Arc::new(LockStats::new());
        LockManager {
            sys: Mutex::new(LockSys::new(config.clone(), stats.clone())),
            stats,
            config,
        }
    }

    pub fn with_config(config: LockSysConfig) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(LockStats::new());
        Ok(LockManager {
            sys: Mutex::new(LockSys::new(config.clone(), stats.clone())),
            stats,
            config,
        })
    }

    pub fn config(&self) -> &LockSysConfig {
        &self.config
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }

    fn registered<'a>(&'a self, trx: TrxId) -> Result<MutexGuard<'a, LockSys>> {
        let sys = self.sys.lock();
        if !sys.trxs.contains_key(&trx) {
            return Err(Error::UnknownTransaction(trx));
        }
        Ok(sys)
    }

    // Transactions

    /// Registers a new transaction and returns its id.
    pub fn begin_trx(&self, options: TrxOptions) -> TrxId {
        let mut sys = self.sys.lock();
        let id = TrxId(sys.next_trx_id);
        sys.next_trx_id += 1;
        sys.trxs.insert(id, TrxLocks::new(id, options));
        debug!(trx = %id, isolation = ?options.isolation, "transaction registered");
        id
    }

    /// Records how many undo records the transaction has written.
    pub fn set_undo_no(&self, trx: TrxId, undo_no: u64) -> Result<()> {
        let mut sys = self.registered(trx)?;
        sys.trx_mut(trx).undo_no = undo_no;
        Ok(())
    }

    pub fn trx_is_active(&self, trx: TrxId) -> bool {
        self.sys.lock().trx_is_active(trx)
    }

    /// Whether the transaction has a lock request that is not granted yet.
    pub fn is_waiting(&self, trx: TrxId) -> bool {
        self.sys
            .lock()
            .trxs
            .get(&trx)
            .map_or(false, |t| t.wait_lock.is_some())
    }

    pub fn commit_trx(&self, trx: TrxId) -> Result<()> {
        self.end_trx(trx, "committed")
    }

    pub fn rollback_trx(&self, trx: TrxId) -> Result<()> {
        self.end_trx(trx, "rolled back")
    }

    fn end_trx(&self, trx: TrxId, outcome: &str) -> Result<()> {
        let mut sys = self.registered(trx)?;
        sys.trx_mut(trx).releasing = true;
        if let Some(wait_lock) = sys.trx(trx).wait_lock {
            sys.cancel_waiting_and_release(wait_lock);
        }
        let n_locks = sys.trx(trx).locks.len();
        Self::release_locks(&mut sys, trx, self.config.release_batch_size);
        sys.trxs.remove(&trx);
        debug!(trx = %trx, n_locks, "transaction {}", outcome);
        Ok(())
    }

    /// Releases all locks of `trx`, letting other threads in every
    /// `batch` locks.
    fn release_locks(sys: &mut MutexGuard<'_, LockSys>, trx: TrxId, batch: usize) {
        while !sys.release_batch(trx, batch) {
            MutexGuard::bump(sys);
        }
    }

    // Lock requests

    /// Locks a table. `LockWait` means the caller must call
    /// [`suspend_until_granted`](Self::suspend_until_granted).
    pub fn lock_table(&self, trx: TrxId, table: TableId, mode: LockMode) -> Result<LockStatus> {
        self.registered(trx)?.lock_table(trx, table, mode)
    }

    /// Explicit record lock request.
    pub fn lock_rec(
        &self,
        trx: TrxId,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
    ) -> Result<LockStatus> {
        self.registered(trx)?
            .rec_lock(false, mode, flags, page, heap_no, index, trx)
    }

    /// Blocks the calling thread until the wait lock of `trx` is granted.
    ///
    /// Fails with `Deadlock` if the transaction was rolled back to break a
    /// cycle while waiting, with `LockWaitCancelled` if the request was
    /// cancelled (or the transaction ended) under it, and with
    /// `LockWaitTimeout` (after cancelling the request) once `timeout`, or
    /// the configured timeout, has elapsed.
    pub fn suspend_until_granted(&self, trx: TrxId, timeout: Option<Duration>) -> Result<()> {
        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.config.lock_wait_timeout());
        let mut sys = self.sys.lock();
        if trx.as_u64() >= sys.next_trx_id {
            return Err(Error::UnknownTransaction(trx));
        }
        loop {
            // An ended transaction cannot have been granted anything.
            let Some(t) = sys.trxs.get_mut(&trx) else {
                return Err(Error::LockWaitCancelled { trx });
            };
            let Some(wait_lock) = t.wait_lock else {
                return Self::wait_result(t, trx);
            };
            let wakeup = t.wakeup.clone();
            if wakeup.wait_until(&mut sys, deadline).timed_out() {
                let Some(t) = sys.trxs.get_mut(&trx) else {
                    return Err(Error::LockWaitCancelled { trx });
                };
                // The wait may have ended right at the deadline.
                if t.wait_lock.is_none() {
                    return Self::wait_result(t, trx);
                }
                warn!(trx = %trx, lock = %wait_lock, "lock wait timeout exceeded");
                sys.cancel_waiting_and_release(wait_lock);
                // Reported as a timeout, not as a cancellation.
                if let Some(t) = sys.trxs.get_mut(&trx) {
                    t.wait_outcome = None;
                }
                self.stats.record_wait_timeout();
                return Err(Error::LockWaitTimeout { trx });
            }
        }
    }

    /// Maps how the last wait of `t` ended to the caller's result. Being
    /// chosen as a victim sticks until rollback; a cancellation is reported
    /// once.
    fn wait_result(t: &mut TrxLocks, trx: TrxId) -> Result<()> {
        match t.wait_outcome {
            Some(WaitOutcome::ChosenAsVictim) => Err(Error::Deadlock { trx }),
            Some(WaitOutcome::Cancelled) => {
                t.wait_outcome = None;
                Err(Error::LockWaitCancelled { trx })
            }
            Some(WaitOutcome::Granted) | None => Ok(()),
        }
    }

    /// Cancels the pending lock request of `trx`, as a kill or timeout
    /// handler would. Returns false if it was not waiting.
    pub fn cancel_wait(&self, trx: TrxId) -> Result<bool> {
        let mut sys = self.registered(trx)?;
        match sys.trx(trx).wait_lock {
            Some(wait_lock) => {
                sys.cancel_waiting_and_release(wait_lock);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Early release

    pub fn rec_unlock(&self, trx: TrxId, page: PageId, heap_no: HeapNo, mode: LockMode) -> Result<bool> {
        Ok(self.registered(trx)?.rec_unlock(trx, page, heap_no, mode))
    }

    pub fn table_unlock(&self, trx: TrxId, table: TableId, mode: LockMode) -> Result<bool> {
        Ok(self.registered(trx)?.table_unlock(trx, table, mode))
    }

    pub fn release_autoinc_last_lock(&self, trx: TrxId) -> Result<bool> {
        Ok(self.registered(trx)?.release_autoinc_last_lock(trx))
    }

    pub fn release_autoinc_locks(&self, trx: TrxId) -> Result<()> {
        self.registered(trx)?.release_autoinc_locks(trx);
        Ok(())
    }

    pub fn trx_holds_autoinc_locks(&self, trx: TrxId) -> bool {
        self.sys
            .lock()
            .trxs
            .get(&trx)
            .map_or(false, |t| t.last_autoinc().is_some())
    }

    /// Drops every lock on a table that is being dropped or truncated.
    pub fn remove_all_on_table(&self, table: TableId, remove_also_table_sx_locks: bool) {
        self.sys
            .lock()
            .remove_all_on_table(table, remove_also_table_sx_locks);
    }

    pub fn rec_convert_impl_to_expl(&self, owner: TrxId, page: PageRef, heap_no: HeapNo, index: IndexRef) {
        self.sys
            .lock()
            .rec_convert_impl_to_expl(owner, page, heap_no, index);
    }

    // Row-operation guards

    pub fn rec_insert_check_and_lock(
        &self,
        flags: GuardFlags,
        page: PageRef,
        next_heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<InsertCheck> {
        self.registered(trx)?
            .rec_insert_check_and_lock(flags, page, next_heap_no, index, trx)
    }

    pub fn clust_rec_modify_check_and_lock(
        &self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
        rec_trx: TrxId,
    ) -> Result<LockStatus> {
        self.registered(trx)?
            .clust_rec_modify_check_and_lock(flags, page, heap_no, index, trx, rec_trx)
    }

    pub fn sec_rec_modify_check_and_lock(
        &self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<LockStatus> {
        self.registered(trx)?
            .sec_rec_modify_check_and_lock(flags, page, heap_no, index, trx)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sec_rec_read_check_and_lock(
        &self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        mode: LockMode,
        gap_mode: RecordLockFlags,
        trx: TrxId,
        page_max_trx_id: TrxId,
        impl_owner: Option<TrxId>,
    ) -> Result<LockStatus> {
        self.registered(trx)?.sec_rec_read_check_and_lock(
            flags,
            page,
            heap_no,
            index,
            mode,
            gap_mode,
            trx,
            page_max_trx_id,
            impl_owner,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn clust_rec_read_check_and_lock(
        &self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        mode: LockMode,
        gap_mode: RecordLockFlags,
        trx: TrxId,
        rec_trx: TrxId,
    ) -> Result<LockStatus> {
        self.registered(trx)?.clust_rec_read_check_and_lock(
            flags, page, heap_no, index, mode, gap_mode, trx, rec_trx,
        )
    }

    // Page reorganization

    pub fn move_reorganize_page(&self, page: PageRef, moves: &[HeapMove]) {
        self.sys.lock().move_reorganize_page(page, moves);
    }

    pub fn move_rec_list_end(&self, new_page: PageRef, old_page: PageId, moves: &[HeapMove]) {
        self.sys.lock().move_rec_list_end(new_page, old_page, moves);
    }

    pub fn move_rec_list_start(&self, new_page: PageRef, old_page: PageId, moves: &[HeapMove]) {
        self.sys.lock().move_rec_list_start(new_page, old_page, moves);
    }

    pub fn update_split_right(&self, right: PageRef, left: PageRef, right_first_heap_no: HeapNo) {
        self.sys
            .lock()
            .update_split_right(right, left, right_first_heap_no);
    }

    pub fn update_merge_right(&self, right: PageRef, orig_succ_heap_no: HeapNo, left: PageId) {
        self.sys
            .lock()
            .update_merge_right(right, orig_succ_heap_no, left);
    }

    pub fn update_root_raise(&self, new_page: PageRef, root: PageId) {
        self.sys.lock().update_root_raise(new_page, root);
    }

    pub fn update_copy_and_discard(&self, new_page: PageRef, old_page: PageId) {
        self.sys.lock().update_copy_and_discard(new_page, old_page);
    }

    pub fn update_split_left(&self, right: PageRef, left: PageRef, right_first_heap_no: HeapNo) {
        self.sys
            .lock()
            .update_split_left(right, left, right_first_heap_no);
    }

    pub fn update_merge_left(&self, left: PageRef, left_next_heap_no: Option<HeapNo>, right: PageId) {
        self.sys
            .lock()
            .update_merge_left(left, left_next_heap_no, right);
    }

    pub fn rec_reset_and_inherit_gap_locks(
        &self,
        heir: PageRef,
        heir_heap_no: HeapNo,
        donor: PageId,
        heap_no: HeapNo,
    ) {
        self.sys
            .lock()
            .rec_reset_and_inherit_gap_locks(heir, heir_heap_no, donor, heap_no);
    }

    pub fn update_discard(&self, heir: PageRef, heir_heap_no: HeapNo, page: PageId, heap_nos: &[HeapNo]) {
        self.sys
            .lock()
            .update_discard(heir, heir_heap_no, page, heap_nos);
    }

    pub fn update_insert(&self, page: PageRef, heap_no: HeapNo, next_heap_no: HeapNo) {
        self.sys.lock().update_insert(page, heap_no, next_heap_no);
    }

    pub fn update_delete(&self, page: PageRef, heap_no: HeapNo, next_heap_no: HeapNo) {
        self.sys.lock().update_delete(page, heap_no, next_heap_no);
    }

    pub fn rec_store_on_page_infimum(&self, page: PageRef, heap_no: HeapNo) {
        self.sys.lock().rec_store_on_page_infimum(page, heap_no);
    }

    pub fn rec_restore_from_page_infimum(&self, page: PageRef, heap_no: HeapNo, donor: PageId) {
        self.sys
            .lock()
            .rec_restore_from_page_infimum(page, heap_no, donor);
    }

    pub fn rec_free_all_from_discard_page(&self, page: PageId) {
        self.sys.lock().rec_free_all_from_discard_page(page);
    }

    // Introspection

    pub fn has_table_lock(&self, trx: TrxId, table: TableId, mode: LockMode) -> bool {
        self.sys.lock().table_has(trx, table, mode).is_some()
    }

    /// Whether `trx` holds a granted record lock covering the request.
    pub fn has_rec_lock(
        &self,
        trx: TrxId,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageId,
        heap_no: HeapNo,
    ) -> bool {
        self.sys
            .lock()
            .rec_has_expl(mode, flags, page, heap_no, trx)
            .is_some()
    }

    /// Lock requests on one record in queue order, as (trx, request) pairs.
    pub fn rec_queue(&self, page: PageId, heap_no: HeapNo) -> Vec<(TrxId, LockRequest)> {
        let sys = self.sys.lock();
        sys.rec_locks(page, heap_no)
            .into_iter()
            .map(|id| {
                let lock = sys.lock(id);
                (lock.trx, lock.request())
            })
            .collect()
    }

    pub fn number_of_rows_locked(&self, trx: TrxId) -> Result<usize> {
        Ok(self.registered(trx)?.number_of_rows_locked(trx))
    }

    /// Number of lock objects the transaction owns.
    pub fn n_lock_structs(&self, trx: TrxId) -> Result<usize> {
        Ok(self.registered(trx)?.trx(trx).locks.len())
    }

    /// Every waiting lock and every lock blocking one.
    pub fn lock_snapshot(&self) -> Vec<LockInfo> {
        self.sys.lock().lock_waits().0
    }

    pub fn lock_waits(&self) -> (Vec<LockInfo>, Vec<LockWaitInfo>) {
        self.sys.lock().lock_waits()
    }

    pub fn last_deadlock(&self) -> Option<DeadlockReport> {
        self.sys.lock().last_deadlock.clone()
    }

    pub fn print_info_summary(&self) -> String {
        self.sys.lock().print_info_summary()
    }

    /// Status block for every registered transaction. The mutex is yielded
    /// every few transactions; ones that end meanwhile are skipped.
    pub fn print_info_all_transactions(&self) -> String {
        let mut sys = self.sys.lock();
        let trxs: Vec<TrxId> = sys.trxs.keys().copied().collect();
        let mut out = String::from("LIST OF TRANSACTIONS FOR EACH SESSION:\n");
        for (i, trx) in trxs.into_iter().enumerate() {
            if i > 0 && i % PRINT_TRX_BATCH == 0 {
                MutexGuard::bump(&mut sys);
            }
            if let Some(block) = sys.print_trx(trx) {
                out.push_str(&block);
            }
        }
        out
    }

    /// Full consistency scan of the lock table.
    pub fn validate(&self) -> Result<()> {
        self.sys.lock().validate()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
