// Record Lock Store
//
// Per-page queues of bitmap lock objects. Queue order is arrival order and
// is what "ahead in the queue" means everywhere else.
use super::bitmap::LockBitmap;
use super::compat;
use super::lock_sys::{rec_has_to_wait, LockSys, LockTarget, RecLock};
use super::types::*;
use tracing::trace;

impl LockSys {
    /// Snapshot of the lock queue of a page.
    pub fn page_locks(&self, page: PageId) -> Vec<LockId> {
        self.rec_hash.get(&page).cloned().unwrap_or_default()
    }

    /// Locks on one record, in queue order.
    pub fn rec_locks(&self, page: PageId, heap_no: HeapNo) -> Vec<LockId> {
        self.rec_hash
            .get(&page)
            .map(|queue| {
                queue
                    .iter()
                    .copied()
                    .filter(|&id| self.lock(id).has_bit(heap_no))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rec_get_first(&self, page: PageId, heap_no: HeapNo) -> Option<LockId> {
        self.rec_hash
            .get(&page)?
            .iter()
            .copied()
            .find(|&id| self.lock(id).has_bit(heap_no))
    }

    /// Next lock on the same record after `after` in the page queue.
    pub fn rec_get_next(&self, heap_no: HeapNo, after: LockId) -> Option<LockId> {
        let page = self.lock(after).rec()?.page;
        let queue = self.rec_hash.get(&page)?;
        let pos = queue.iter().position(|&id| id == after)?;
        queue[pos + 1..]
            .iter()
            .copied()
            .find(|&id| self.lock(id).has_bit(heap_no))
    }

    /// Allocates a new record lock with only `heap_no` set and appends it to
    /// the page queue.
    pub fn rec_create(
        &mut self,
        mode: LockMode,
        mut flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> LockId {
        // Every lock on the supremum is a gap lock by definition.
        if heap_no == PAGE_HEAP_NO_SUPREMUM {
            flags.remove(RecordLockFlags::GAP_MODE);
        }
        let n_bits = page.n_heap.max(heap_no + 1) + self.config.bitmap_safety_margin;
        let mut bits = LockBitmap::new(n_bits);
        bits.set(heap_no);

        let waiting = flags.contains(RecordLockFlags::WAIT);
        flags.remove(RecordLockFlags::WAIT);
        let id = self.alloc_lock(
            trx,
            mode,
            flags,
            LockTarget::Record(RecLock {
                index,
                page: page.id,
                bits,
            }),
        );
        self.rec_hash.entry(page.id).or_default().push(id);
        if waiting {
            self.set_lock_and_trx_wait(id);
        }
        self.stats.record_rec_lock_created();
        trace!(lock = %id, trx = %trx, page = %page.id, heap_no, "record lock created");
        id
    }

    /// A lock of `trx` on the page with exactly this mode and flags whose
    /// bitmap can hold `heap_no`.
    pub fn rec_find_similar_on_page(
        &self,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageId,
        heap_no: HeapNo,
        trx: TrxId,
    ) -> Option<LockId> {
        self.rec_hash.get(&page)?.iter().copied().find(|&id| {
            let lock = self.lock(id);
            lock.trx == trx && lock.mode == mode && lock.flags == flags && lock.n_bits() > heap_no
        })
    }

    /// Adds a lock bit, reusing an existing lock object of the transaction
    /// when nobody waits on the record.
    pub fn rec_add_to_queue(
        &mut self,
        mode: LockMode,
        mut flags: RecordLockFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> LockId {
        if heap_no == PAGE_HEAP_NO_SUPREMUM {
            debug_assert!(!flags.contains(RecordLockFlags::REC_NOT_GAP));
            flags.remove(RecordLockFlags::GAP_MODE);
        }

        // A new bit must not jump over a waiter on the same record.
        let somebody_waits = self
            .rec_locks(page.id, heap_no)
            .into_iter()
            .any(|id| self.lock(id).is_waiting());

        if !somebody_waits && !flags.contains(RecordLockFlags::WAIT) {
            if let Some(id) = self.rec_find_similar_on_page(mode, flags, page.id, heap_no, trx) {
                if let Some(rec) = self.lock_mut(id).rec_mut() {
                    rec.bits.set(heap_no);
                }
                return id;
            }
        }
        self.rec_create(mode, flags, page, heap_no, index, trx)
    }

    /// Granted lock of `trx` on the record that is at least as strong as the
    /// request, with gap nuance respected.
    pub fn rec_has_expl(
        &self,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageId,
        heap_no: HeapNo,
        trx: TrxId,
    ) -> Option<LockId> {
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        let supremum = heap_no == PAGE_HEAP_NO_SUPREMUM;
        self.rec_locks(page, heap_no).into_iter().find(|&id| {
            let lock = self.lock(id);
            lock.trx == trx
                && !lock.is_waiting()
                && !lock.is_insert_intention()
                && compat::stronger_or_equal(lock.mode, mode)
                && (!lock.is_rec_not_gap()
                    || flags.contains(RecordLockFlags::REC_NOT_GAP)
                    || supremum)
                && (!lock.is_gap() || flags.contains(RecordLockFlags::GAP) || supremum)
        })
    }

    /// A lock of another transaction on the record at least as strong as `mode`.
    ///
    /// `gap` includes gap-type locks, `wait` includes waiting requests.
    pub fn rec_other_has_expl_req(
        &self,
        mode: LockMode,
        gap: bool,
        wait: bool,
        page: PageId,
        heap_no: HeapNo,
        trx: TrxId,
    ) -> Option<LockId> {
        self.rec_locks(page, heap_no).into_iter().find(|&id| {
            let lock = self.lock(id);
            lock.trx != trx
                && (gap || !(lock.is_gap() || heap_no == PAGE_HEAP_NO_SUPREMUM))
                && (wait || !lock.is_waiting())
                && compat::stronger_or_equal(lock.mode, mode)
        })
    }

    /// First lock of another transaction the request would have to wait for.
    pub fn rec_other_has_conflicting(
        &self,
        mode: LockMode,
        flags: RecordLockFlags,
        page: PageId,
        heap_no: HeapNo,
        trx: TrxId,
    ) -> Option<LockId> {
        let supremum = heap_no == PAGE_HEAP_NO_SUPREMUM;
        self.rec_locks(page, heap_no)
            .into_iter()
            .find(|&id| rec_has_to_wait(trx, mode, flags, self.lock(id), supremum))
    }

    /// Whether a waiting record lock still conflicts with a lock ahead of it.
    pub fn rec_has_to_wait_in_queue(&self, wait_lock: LockId) -> bool {
        !self.blockers_of(wait_lock).is_empty()
    }

    /// Clears one bit; a granted lock whose bitmap becomes empty is destroyed.
    pub fn rec_reset_nth_bit(&mut self, id: LockId, heap_no: HeapNo) {
        if let Some(rec) = self.lock_mut(id).rec_mut() {
            rec.bits.reset(heap_no);
        }
        self.rec_discard_if_empty(id);
    }

    pub fn rec_discard_if_empty(&mut self, id: LockId) {
        let empty = match self.locks.get(&id) {
            Some(lock) => !lock.is_waiting() && lock.rec().map_or(false, |r| r.bits.is_empty()),
            None => false,
        };
        if empty {
            self.rec_discard(id);
        }
    }

    /// Removes a record lock without granting anything behind it.
    pub fn rec_discard(&mut self, id: LockId) {
        let page = match self.lock(id).rec() {
            Some(rec) => rec.page,
            None => return,
        };
        if let Some(queue) = self.rec_hash.get_mut(&page) {
            queue.retain(|&l| l != id);
            if queue.is_empty() {
                self.rec_hash.remove(&page);
            }
        }
        self.free_lock(id);
    }

    /// Removes a record lock and grants every waiter on the page that no
    /// longer conflicts with anything ahead of it.
    pub fn rec_dequeue_from_page(&mut self, id: LockId) {
        let page = match self.lock(id).rec() {
            Some(rec) => rec.page,
            None => return,
        };
        if self.lock(id).is_waiting() {
            self.reset_lock_and_trx_wait(id);
        }
        self.rec_discard(id);
        self.rec_grant_waiters(self.page_locks(page));
    }

    /// Grants the waiting locks among `candidates` that are now unblocked.
    pub fn rec_grant_waiters(&mut self, candidates: Vec<LockId>) {
        for id in candidates {
            let waiting = self.locks.get(&id).map_or(false, |l| l.is_waiting());
            if waiting && !self.rec_has_to_wait_in_queue(id) {
                self.grant(id);
            }
        }
    }

    /// Cancels a waiting lock request on a record that is going away.
    pub fn rec_cancel(&mut self, id: LockId, heap_no: HeapNo) {
        let trx = self.lock(id).trx;
        if let Some(rec) = self.lock_mut(id).rec_mut() {
            rec.bits.reset(heap_no);
        }
        self.reset_lock_and_trx_wait(id);
        self.rec_discard_if_empty(id);
        self.wait_cancelled(trx);
    }

    /// Drops every lock on the record; waiters are woken, not silently dropped.
    pub fn rec_reset_and_release_wait(&mut self, page: PageId, heap_no: HeapNo) {
        for id in self.rec_locks(page, heap_no) {
            if self.lock(id).is_waiting() {
                self.rec_cancel(id, heap_no);
            } else {
                self.rec_reset_nth_bit(id, heap_no);
            }
        }
    }

    /// Total set bits across the locks of a transaction.
    pub fn number_of_rows_locked(&self, trx: TrxId) -> usize {
        self.trx(trx)
            .locks
            .iter()
            .filter_map(|&id| self.lock(id).rec())
            .map(|rec| rec.bits.count_ones())
            .sum()
    }
}
