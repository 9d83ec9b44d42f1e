// Wait Queue / Grant Engine
use super::lock_sys::{fatal, LockSys, LockTarget};
use super::trx::WaitOutcome;
use super::types::*;
use crate::error::{Error, Result};
use std::time::Instant;
use tracing::{debug, error};

/// Outcome of the single-lock fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastPath {
    /// Already locked, nothing changed.
    Success,
    /// A lock bit was set or created.
    SuccessCreated,
    /// The queue is not trivial; take the slow path.
    Fail,
}

impl LockSys {
    /// Grants a waiting lock and resumes its owner if it is suspended on it.
    pub fn grant(&mut self, id: LockId) {
        self.reset_lock_and_trx_wait(id);
        let (trx, mode, target_table) = {
            let lock = self.lock(id);
            let table = match lock.target {
                LockTarget::Table(table) => Some(table),
                LockTarget::Record(_) => None,
            };
            (lock.trx, lock.mode, table)
        };
        self.set_wait_outcome(trx, WaitOutcome::Granted);

        if let (LockMode::AutoInc, Some(table)) = (mode, target_table) {
            let already = self
                .tables
                .get(&table)
                .map_or(false, |q| q.autoinc_trx == Some(trx));
            if already {
                error!(trx = %trx, table = %table, "transaction already had an AUTO_INC lock");
            } else {
                if let Some(queue) = self.tables.get_mut(&table) {
                    queue.autoinc_trx = Some(trx);
                }
                self.trx_mut(trx).autoinc_locks.push(Some(id));
            }
        }

        debug!(lock = %id, trx = %trx, mode = %mode, "lock granted after wait");
        self.stats.record_grant_after_wait();

        // A deadlock victim-other resolution may grant a lock to a
        // transaction that never got as far as suspending.
        if self.trx(trx).que_state == TrxQueState::LockWait {
            self.end_lock_wait(trx);
        }
    }

    /// The calling thread must be runnable: a transaction has at most one
    /// outstanding wait.
    fn assert_runnable(&self, trx: TrxId) {
        let t = self.trx(trx);
        if t.que_state == TrxQueState::LockWait || t.wait_lock.is_some() {
            fatal(format!(
                "{} requested a lock while its query thread is suspended",
                trx
            ));
        }
    }

    fn begin_wait(&mut self, trx: TrxId) {
        let t = self.trx_mut(trx);
        t.que_state = TrxQueState::LockWait;
        t.wait_outcome = None;
        t.wait_started = Some(Instant::now());
        self.stats.record_wait();
    }

    fn rec_lock_fast(
        &mut self,
        implicit: bool,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> FastPath {
        let queue = self.page_locks(page.id);
        match queue.as_slice() {
            [] => {
                if !implicit {
                    self.rec_create(mode, flags, page, heap_no, index, trx);
                }
                FastPath::SuccessCreated
            }
            [only] => {
                let only = *only;
                let (matches, has_bit) = {
                    let lock = self.lock(only);
                    let mut wanted = flags;
                    if heap_no == PAGE_HEAP_NO_SUPREMUM {
                        wanted.remove(RecordLockFlags::GAP_MODE);
                    }
                    (
                        lock.trx == trx
                            && lock.mode == mode
                            && lock.flags == wanted
                            && lock.n_bits() > heap_no,
                        lock.has_bit(heap_no),
                    )
                };
                if !matches {
                    return FastPath::Fail;
                }
                if !implicit && !has_bit {
                    if let Some(rec) = self.lock_mut(only).rec_mut() {
                        rec.bits.set(heap_no);
                    }
                    return FastPath::SuccessCreated;
                }
                FastPath::Success
            }
            _ => FastPath::Fail,
        }
    }

    fn rec_lock_slow(
        &mut self,
        implicit: bool,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<LockStatus> {
        if self
            .rec_has_expl(mode, flags, page.id, heap_no, trx)
            .is_some()
        {
            // Already covered by a stronger lock of our own.
            return Ok(LockStatus::Success);
        }
        if self
            .rec_other_has_conflicting(mode, flags, page.id, heap_no, trx)
            .is_some()
        {
            return self.rec_enqueue_waiting(mode, flags, page, heap_no, index, trx);
        }
        if !implicit {
            self.rec_add_to_queue(mode, flags, page, heap_no, index, trx);
            return Ok(LockStatus::SuccessLockedRec);
        }
        Ok(LockStatus::Success)
    }

    /// Locks a record for `trx`, enqueueing a waiting request on conflict.
    ///
    /// With `implicit` set the caller already owns an implicit lock, so
    /// nothing is created unless a wait is needed.
    pub fn rec_lock(
        &mut self,
        implicit: bool,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<LockStatus> {
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        debug_assert!(!flags.contains(RecordLockFlags::WAIT));
        self.assert_runnable(trx);
        match self.rec_lock_fast(implicit, mode, flags, page, heap_no, index, trx) {
            FastPath::Success => Ok(LockStatus::Success),
            FastPath::SuccessCreated => Ok(LockStatus::SuccessLockedRec),
            FastPath::Fail => self.rec_lock_slow(implicit, mode, flags, page, heap_no, index, trx),
        }
    }

    /// Enqueues a waiting record lock and runs deadlock detection.
    ///
    /// `Ok(LockWait)`: suspend. `Ok(SuccessLockedRec)`: a deadlock was broken
    /// by rolling back someone else and the request was granted meanwhile.
    /// `Err(Deadlock)`: this transaction is the victim; its request is gone.
    pub fn rec_enqueue_waiting(
        &mut self,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<LockStatus> {
        self.assert_runnable(trx);

        let id = self.rec_create(
            mode,
            flags | RecordLockFlags::WAIT,
            page,
            heap_no,
            index,
            trx,
        );

        if self.config.deadlock_detect && self.deadlock_occurs(id, trx) {
            self.reset_lock_and_trx_wait(id);
            self.rec_reset_nth_bit(id, heap_no);
            return Err(Error::Deadlock { trx });
        }

        if self.trx(trx).wait_lock.is_none() {
            return Ok(LockStatus::SuccessLockedRec);
        }

        self.begin_wait(trx);
        debug!(
            trx = %trx,
            lock = %id,
            page = %page.id,
            heap_no,
            mode = %LockRequest::record(mode, flags).mode_string(),
            "record lock wait"
        );
        Ok(LockStatus::LockWait)
    }

    /// Locks a table in `mode` for `trx`.
    pub fn lock_table(&mut self, trx: TrxId, table: TableId, mode: LockMode) -> Result<LockStatus> {
        self.assert_runnable(trx);
        if self.table_has(trx, table, mode).is_some() {
            return Ok(LockStatus::Success);
        }
        if self
            .table_other_has_incompatible(trx, true, table, mode)
            .is_some()
        {
            return self.table_enqueue_waiting(trx, table, mode);
        }
        self.table_create(table, mode, false, trx);
        Ok(LockStatus::Success)
    }

    fn table_enqueue_waiting(
        &mut self,
        trx: TrxId,
        table: TableId,
        mode: LockMode,
    ) -> Result<LockStatus> {
        self.assert_runnable(trx);

        let id = self.table_create(table, mode, true, trx);

        if self.config.deadlock_detect && self.deadlock_occurs(id, trx) {
            // Remove while the lock still says it is waiting so the
            // AUTO_INC accounting sees the right state.
            self.table_remove_low(id);
            return Err(Error::Deadlock { trx });
        }

        if self.trx(trx).wait_lock.is_none() {
            return Ok(LockStatus::Success);
        }

        self.begin_wait(trx);
        debug!(trx = %trx, lock = %id, table = %table, mode = %mode, "table lock wait");
        Ok(LockStatus::LockWait)
    }

    /// Cancels a waiting lock request, grants whatever it was blocking and
    /// ends the owner's lock wait.
    pub fn cancel_waiting_and_release(&mut self, id: LockId) {
        let (trx, kind) = {
            let lock = self.lock(id);
            debug_assert!(lock.is_waiting(), "{} is not waiting", id);
            (lock.trx, lock.kind())
        };
        match kind {
            LockKind::Record => self.rec_dequeue_from_page(id),
            LockKind::Table => {
                // A transaction that waits on a table lock gives up its
                // AUTO_INC locks too.
                if !self.trx(trx).autoinc_locks.is_empty() {
                    self.release_autoinc_locks(trx);
                }
                if self.locks.contains_key(&id) {
                    self.table_dequeue(id);
                }
            }
        }
        self.wait_cancelled(trx);
    }
}
