// Lock release paths: commit/rollback, single-record unlock, table drop and
// implicit-to-explicit conversion.
use super::lock_sys::{fatal, LockSys};
use super::types::*;
use tracing::{debug, error};

impl LockSys {
    /// Releases up to `batch` locks of `trx`, newest first, granting waiters
    /// as it goes. Returns true once the transaction holds no locks.
    ///
    /// The caller yields the lock-table mutex between batches.
    pub fn release_batch(&mut self, trx: TrxId, batch: usize) -> bool {
        for _ in 0..batch {
            let Some(&id) = self.trx(trx).locks.last() else {
                break;
            };
            match self.lock(id).kind() {
                LockKind::Record => self.rec_dequeue_from_page(id),
                LockKind::Table => self.table_dequeue(id),
            }
        }
        if !self.trx(trx).locks.is_empty() {
            return false;
        }
        self.trx_mut(trx).autoinc_locks.clear();
        true
    }

    /// Releases every lock of `trx` in one go.
    pub fn release_all(&mut self, trx: TrxId) {
        while !self.release_batch(trx, usize::MAX) {}
    }

    /// Releases the granted lock of `trx` in `mode` on one record and grants
    /// waiters on that record that became free.
    ///
    /// Used when a semi-consistent read decides a row does not match. The
    /// lock searched for is the newest matching one.
    pub fn rec_unlock(&mut self, trx: TrxId, page: PageId, heap_no: HeapNo, mode: LockMode) -> bool {
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        let found = self
            .rec_locks(page, heap_no)
            .into_iter()
            .rev()
            .find(|&id| {
                let lock = self.lock(id);
                lock.trx == trx && lock.mode == mode && !lock.is_waiting()
            });
        let Some(id) = found else {
            error!(trx = %trx, page = %page, heap_no, mode = %mode, "unlock row could not find a lock on the row");
            return false;
        };

        let others = self.rec_locks(page, heap_no);
        self.rec_reset_nth_bit(id, heap_no);
        self.rec_grant_waiters(others);
        true
    }

    /// Drops all locks on a table and its records, e.g. before the table is
    /// dropped. None of the removed locks may be waiting.
    ///
    /// Table-level S and X locks are kept unless `remove_also_table_sx_locks`;
    /// kept waiters that are no longer blocked are granted.
    pub fn remove_all_on_table(&mut self, table: TableId, remove_also_table_sx_locks: bool) {
        let rec_locks: Vec<LockId> = self
            .locks
            .values()
            .filter(|l| l.rec().map_or(false, |r| r.index.table == table))
            .map(|l| l.id)
            .collect();
        for id in rec_locks {
            if self.lock(id).is_waiting() {
                fatal(format!("{} still waits while locks on {} are removed", id, table));
            }
            self.rec_discard(id);
        }

        // Table S and X locks may stay, waiting or not; only what is
        // removed must not wait.
        for id in self.table_locks(table) {
            let (mode, waiting) = {
                let lock = self.lock(id);
                (lock.mode, lock.is_waiting())
            };
            if remove_also_table_sx_locks || !matches!(mode, LockMode::S | LockMode::X) {
                if waiting {
                    fatal(format!("{} still waits while locks on {} are removed", id, table));
                }
                self.table_remove_low(id);
            }
        }
        for id in self.table_locks(table) {
            if self.lock(id).is_waiting() && !self.table_has_to_wait_in_queue(id) {
                self.grant(id);
            }
        }
        debug!(table = %table, remove_also_table_sx_locks, "locks on table removed");
    }

    /// Releases one granted table lock of `trx`, the newest one in `mode`.
    pub fn table_unlock(&mut self, trx: TrxId, table: TableId, mode: LockMode) -> bool {
        let found = self.table_locks(table).into_iter().rev().find(|&id| {
            let lock = self.lock(id);
            lock.trx == trx && lock.mode == mode && !lock.is_waiting()
        });
        match found {
            Some(id) => {
                self.table_dequeue(id);
                true
            }
            None => false,
        }
    }

    /// Turns the implicit X lock `owner` holds on a record it wrote into an
    /// explicit `X,REC_NOT_GAP` lock, so that a waiting request can queue
    /// behind it.
    pub fn rec_convert_impl_to_expl(
        &mut self,
        owner: TrxId,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
    ) {
        debug_assert!(heap_no >= PAGE_HEAP_NO_USER_LOW, "sentinels carry no implicit lock");
        if owner.as_u64() >= self.next_trx_id {
            fatal(format!(
                "{} on {} heap no {} is newer than any transaction ever started (next id {})",
                owner, page.id, heap_no, self.next_trx_id
            ));
        }
        if !self.trx_is_active(owner) {
            return;
        }
        let flags = RecordLockFlags::REC_NOT_GAP;
        if self
            .rec_has_expl(LockMode::X, flags, page.id, heap_no, owner)
            .is_none()
        {
            self.rec_add_to_queue(LockMode::X, flags, page, heap_no, index, owner);
        }
    }
}
