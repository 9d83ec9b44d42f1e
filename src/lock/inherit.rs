// Lock inheritance across page reorganizations
//
// The B-tree layer calls these when records move between heap slots or
// pages. They only move lock bits; nothing is granted, except that locks
// on records that disappear are released and their waiters woken.
use super::lock_sys::LockSys;
use super::types::*;
use tracing::{trace, warn};

impl LockSys {
    /// Whether an X lock of `trx` is exempt from gap inheritance.
    fn skips_gap_inheritance(&self, trx: TrxId, mode: LockMode) -> bool {
        mode == LockMode::X
            && (self.config.locks_unsafe_for_binlog
                || self.trx(trx).isolation <= IsolationLevel::ReadCommitted)
    }

    /// Makes `heir` inherit the locks on `heap_no` as gap locks. Insert
    /// intentions are not inherited; neither are X locks of transactions
    /// that do not use gap locking.
    pub fn rec_inherit_to_gap(
        &mut self,
        heir: PageRef,
        heir_heap_no: HeapNo,
        donor: PageId,
        heap_no: HeapNo,
    ) {
        for id in self.rec_locks(donor, heap_no) {
            let (trx, mode, index, insert_intention) = {
                let lock = self.lock(id);
                let index = match lock.rec() {
                    Some(rec) => rec.index,
                    None => continue,
                };
                (lock.trx, lock.mode, index, lock.is_insert_intention())
            };
            if insert_intention || self.skips_gap_inheritance(trx, mode) {
                continue;
            }
            self.rec_add_to_queue(mode, RecordLockFlags::GAP, heir, heir_heap_no, index, trx);
        }
    }

    /// Like `rec_inherit_to_gap` on the same page, but only for locks that
    /// also cover the gap.
    pub fn rec_inherit_to_gap_if_gap_lock(
        &mut self,
        page: PageRef,
        heir_heap_no: HeapNo,
        heap_no: HeapNo,
    ) {
        for id in self.rec_locks(page.id, heap_no) {
            let (trx, mode, index, eligible) = {
                let lock = self.lock(id);
                let index = match lock.rec() {
                    Some(rec) => rec.index,
                    None => continue,
                };
                let eligible = !lock.is_insert_intention()
                    && (heap_no == PAGE_HEAP_NO_SUPREMUM || !lock.is_rec_not_gap());
                (lock.trx, lock.mode, index, eligible)
            };
            if eligible {
                self.rec_add_to_queue(mode, RecordLockFlags::GAP, page, heir_heap_no, index, trx);
            }
        }
    }

    /// Moves every lock on `donor_heap_no` to the receiver record, which must
    /// carry no locks. Waiting requests stay waiting.
    pub fn rec_move(
        &mut self,
        receiver: PageRef,
        receiver_heap_no: HeapNo,
        donor: PageId,
        donor_heap_no: HeapNo,
    ) {
        debug_assert!(
            receiver.id == donor && receiver_heap_no == donor_heap_no
                || self.rec_get_first(receiver.id, receiver_heap_no).is_none(),
            "receiver record already carries locks"
        );
        for id in self.rec_locks(donor, donor_heap_no) {
            let (trx, mode, flags, index) = {
                let lock = self.lock(id);
                let index = match lock.rec() {
                    Some(rec) => rec.index,
                    None => continue,
                };
                (lock.trx, lock.mode, lock.flags, index)
            };
            if let Some(rec) = self.lock_mut(id).rec_mut() {
                rec.bits.reset(donor_heap_no);
            }
            if flags.contains(RecordLockFlags::WAIT) {
                self.reset_lock_and_trx_wait(id);
            }
            self.rec_discard_if_empty(id);
            self.rec_add_to_queue(mode, flags, receiver, receiver_heap_no, index, trx);
        }
    }

    /// Page compaction: the same records get new heap numbers.
    pub fn move_reorganize_page(&mut self, page: PageRef, moves: &[HeapMove]) {
        let old_locks = self.page_locks(page.id);
        if old_locks.is_empty() {
            return;
        }
        trace!(page = %page.id, locks = old_locks.len(), "moving locks for page reorganize");

        // Copy the old bitmaps, then clear the originals so that re-adding
        // reuses them in their old queue positions.
        let mut copies = Vec::with_capacity(old_locks.len());
        let mut bits_before = 0;
        for &id in &old_locks {
            let lock = self.lock(id).clone();
            if lock.is_waiting() {
                self.reset_lock_and_trx_wait(id);
            }
            if let Some(rec) = self.lock_mut(id).rec_mut() {
                bits_before += rec.bits.count_ones();
                rec.bits.clear();
            }
            copies.push(lock);
        }

        let mut bits_after = 0;
        for old in &copies {
            let Some(rec) = old.rec() else { continue };
            for heap_no in rec.bits.iter_set() {
                let new_heap_no = match moves.iter().find(|m| m.old == heap_no) {
                    Some(m) => m.new,
                    // Infimum and supremum keep their slots.
                    None if heap_no < PAGE_HEAP_NO_USER_LOW => heap_no,
                    None => super::lock_sys::fatal(format!(
                        "heap no {} of {} missing from the reorganize mapping",
                        heap_no, page.id
                    )),
                };
                self.rec_add_to_queue(old.mode, old.flags, page, new_heap_no, rec.index, old.trx);
                bits_after += 1;
            }
        }
        debug_assert_eq!(bits_before, bits_after, "lock bits lost in reorganize");

        for id in old_locks {
            self.rec_discard_if_empty(id);
        }
    }

    /// Records moved from `old_page` to `new_page` (split or merge); locks
    /// follow them.
    fn move_rec_list(&mut self, new_page: PageRef, old_page: PageId, moves: &[HeapMove]) {
        for id in self.page_locks(old_page) {
            let (trx, mode, flags, index, moved) = {
                let lock = self.lock(id);
                let Some(rec) = lock.rec() else { continue };
                let moved: Vec<HeapMove> = moves
                    .iter()
                    .copied()
                    .filter(|m| rec.bits.get(m.old))
                    .collect();
                (lock.trx, lock.mode, lock.flags, rec.index, moved)
            };
            if moved.is_empty() {
                continue;
            }
            if flags.contains(RecordLockFlags::WAIT) {
                self.reset_lock_and_trx_wait(id);
            }
            if let Some(rec) = self.lock_mut(id).rec_mut() {
                for m in &moved {
                    rec.bits.reset(m.old);
                }
            }
            self.rec_discard_if_empty(id);
            for m in moved {
                self.rec_add_to_queue(mode, flags, new_page, m.new, index, trx);
            }
        }
    }

    /// The tail of `old_page` (from some record up to the supremum) moved
    /// to `new_page`.
    pub fn move_rec_list_end(&mut self, new_page: PageRef, old_page: PageId, moves: &[HeapMove]) {
        self.move_rec_list(new_page, old_page, moves);
    }

    /// The head of `old_page` (up to some record) moved to `new_page`.
    pub fn move_rec_list_start(&mut self, new_page: PageRef, old_page: PageId, moves: &[HeapMove]) {
        self.move_rec_list(new_page, old_page, moves);
    }

    /// Frees the lock objects of a page that is being discarded. The page
    /// should hold no locked records by now; waiters left behind are
    /// cancelled and woken.
    pub fn rec_free_all_from_discard_page(&mut self, page: PageId) {
        for id in self.page_locks(page) {
            let (trx, waiting, empty) = {
                let lock = self.lock(id);
                let empty = lock.rec().map_or(true, |r| r.bits.is_empty());
                (lock.trx, lock.is_waiting(), empty)
            };
            if waiting {
                self.reset_lock_and_trx_wait(id);
                self.rec_discard(id);
                self.wait_cancelled(trx);
                continue;
            }
            if !empty {
                warn!(lock = %id, trx = %trx, page = %page, "discarding a page with locked records");
            }
            self.rec_discard(id);
        }
    }

    /// Page split to the right. `right_first_heap_no` is the first user
    /// record of the right page.
    pub fn update_split_right(&mut self, right: PageRef, left: PageRef, right_first_heap_no: HeapNo) {
        // The end-of-page gap now belongs to the right page.
        self.rec_move(right, PAGE_HEAP_NO_SUPREMUM, left.id, PAGE_HEAP_NO_SUPREMUM);
        // The new left supremum guards the gap before the right page's first record.
        self.rec_inherit_to_gap(left, PAGE_HEAP_NO_SUPREMUM, right.id, right_first_heap_no);
    }

    /// Left page merged into the right one; `orig_succ_heap_no` is the record
    /// that was the first user record of the right page before the merge.
    pub fn update_merge_right(&mut self, right: PageRef, orig_succ_heap_no: HeapNo, left: PageId) {
        self.rec_inherit_to_gap(right, orig_succ_heap_no, left, PAGE_HEAP_NO_SUPREMUM);
        self.rec_reset_and_release_wait(left, PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(left);
    }

    /// Root raised: its records moved to `new_page`.
    pub fn update_root_raise(&mut self, new_page: PageRef, root: PageId) {
        self.rec_move(new_page, PAGE_HEAP_NO_SUPREMUM, root, PAGE_HEAP_NO_SUPREMUM);
    }

    /// Page contents copied to `new_page` and the old page discarded.
    pub fn update_copy_and_discard(&mut self, new_page: PageRef, old_page: PageId) {
        self.rec_move(new_page, PAGE_HEAP_NO_SUPREMUM, old_page, PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(old_page);
    }

    /// Page split to the left.
    pub fn update_split_left(&mut self, right: PageRef, left: PageRef, right_first_heap_no: HeapNo) {
        self.rec_inherit_to_gap(left, PAGE_HEAP_NO_SUPREMUM, right.id, right_first_heap_no);
    }

    /// Right page merged into the left one. `left_next_heap_no` is the first
    /// record moved over from the right page, `None` if nothing moved.
    pub fn update_merge_left(
        &mut self,
        left: PageRef,
        left_next_heap_no: Option<HeapNo>,
        right: PageId,
    ) {
        if let Some(first_moved) = left_next_heap_no {
            // The old left supremum gap now ends at the first moved record.
            self.rec_inherit_to_gap(left, first_moved, left.id, PAGE_HEAP_NO_SUPREMUM);
            self.rec_reset_and_release_wait(left.id, PAGE_HEAP_NO_SUPREMUM);
        }
        self.rec_move(left, PAGE_HEAP_NO_SUPREMUM, right, PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(right);
    }

    /// Replaces the locks on the heir record by gap locks inherited from
    /// `heap_no` on `donor`.
    pub fn rec_reset_and_inherit_gap_locks(
        &mut self,
        heir: PageRef,
        heir_heap_no: HeapNo,
        donor: PageId,
        heap_no: HeapNo,
    ) {
        self.rec_reset_and_release_wait(heir.id, heir_heap_no);
        self.rec_inherit_to_gap(heir, heir_heap_no, donor, heap_no);
    }

    /// A whole page is discarded; all its records' locks become gap locks
    /// on the heir record. `heap_nos` lists the page's records in key order.
    pub fn update_discard(
        &mut self,
        heir: PageRef,
        heir_heap_no: HeapNo,
        page: PageId,
        heap_nos: &[HeapNo],
    ) {
        if self.page_locks(page).is_empty() {
            return;
        }
        for &heap_no in heap_nos {
            self.rec_inherit_to_gap(heir, heir_heap_no, page, heap_no);
            self.rec_reset_and_release_wait(page, heap_no);
        }
        self.rec_free_all_from_discard_page(page);
    }

    /// A record was inserted at `heap_no`; it inherits the gap locks of its
    /// successor `next_heap_no`.
    pub fn update_insert(&mut self, page: PageRef, heap_no: HeapNo, next_heap_no: HeapNo) {
        self.rec_inherit_to_gap_if_gap_lock(page, heap_no, next_heap_no);
    }

    /// The record at `heap_no` is deleted; its successor inherits its locks
    /// as gap locks and its own locks are released.
    pub fn update_delete(&mut self, page: PageRef, heap_no: HeapNo, next_heap_no: HeapNo) {
        self.rec_inherit_to_gap(page, next_heap_no, page.id, heap_no);
        self.rec_reset_and_release_wait(page.id, heap_no);
    }

    /// Parks the locks of a record on the page infimum while the record is
    /// updated in a way that may relocate it.
    pub fn rec_store_on_page_infimum(&mut self, page: PageRef, heap_no: HeapNo) {
        self.rec_move(page, PAGE_HEAP_NO_INFIMUM, page.id, heap_no);
    }

    /// Moves the parked locks from the infimum of `donor` to the record.
    pub fn rec_restore_from_page_infimum(&mut self, page: PageRef, heap_no: HeapNo, donor: PageId) {
        self.rec_move(page, heap_no, donor, PAGE_HEAP_NO_INFIMUM);
    }
}
