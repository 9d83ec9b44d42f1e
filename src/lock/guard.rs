// Row-Operation Guards
//
// Entry points for the row-operations layer. Each one turns a pending
// implicit lock into an explicit one where other transactions must be able
// to queue behind it, then goes through the regular record lock path.
use super::lock_sys::LockSys;
use super::types::*;
use crate::error::Result;

impl LockSys {
    /// The caller must already hold the intention lock matching `mode` on
    /// the table.
    fn debug_assert_intention(&self, trx: TrxId, table: TableId, mode: LockMode) {
        let intention = match mode {
            LockMode::S => LockMode::IS,
            _ => LockMode::IX,
        };
        debug_assert!(
            self.table_has(trx, table, intention).is_some(),
            "{} locks rows of {} without an {} table lock",
            trx,
            table,
            intention
        );
    }

    /// Checks whether `trx` may insert just before the record `next_heap_no`.
    ///
    /// Takes an `X,GAP,INSERT_INTENTION` lock only if somebody else holds a
    /// conflicting lock on the successor; otherwise nothing is stored. The
    /// returned `inherit` tells the caller whether the new record must take
    /// over gap locks from its successor after the insert.
    pub fn rec_insert_check_and_lock(
        &mut self,
        flags: GuardFlags,
        page: PageRef,
        next_heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<InsertCheck> {
        if flags.contains(GuardFlags::NO_LOCKING) {
            return Ok(InsertCheck {
                status: LockStatus::Success,
                inherit: false,
            });
        }
        self.debug_assert_intention(trx, index.table, LockMode::X);

        if self.rec_get_first(page.id, next_heap_no).is_none() {
            // No locks on the successor: nothing to wait for or inherit.
            return Ok(InsertCheck {
                status: LockStatus::Success,
                inherit: false,
            });
        }

        let lock_flags = RecordLockFlags::GAP | RecordLockFlags::INSERT_INTENTION;
        let status = if self
            .rec_other_has_conflicting(LockMode::X, lock_flags, page.id, next_heap_no, trx)
            .is_some()
        {
            self.rec_enqueue_waiting(LockMode::X, lock_flags, page, next_heap_no, index, trx)?
        } else {
            LockStatus::Success
        };
        Ok(InsertCheck {
            status: granted_as_success(status),
            inherit: true,
        })
    }

    /// Checks whether `trx` may modify (update or delete-mark) a clustered
    /// index record last written by `rec_trx`.
    pub fn clust_rec_modify_check_and_lock(
        &mut self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
        rec_trx: TrxId,
    ) -> Result<LockStatus> {
        if flags.contains(GuardFlags::NO_LOCKING) {
            return Ok(LockStatus::Success);
        }
        debug_assert!(index.clustered);
        self.debug_assert_intention(trx, index.table, LockMode::X);

        if rec_trx != trx {
            self.rec_convert_impl_to_expl(rec_trx, page, heap_no, index);
        }
        let status = self.rec_lock(
            true,
            LockMode::X,
            RecordLockFlags::REC_NOT_GAP,
            page,
            heap_no,
            index,
            trx,
        )?;
        Ok(granted_as_success(status))
    }

    /// Checks whether `trx` may modify a secondary index record. The
    /// clustered record has already been locked, so only a wait matters.
    pub fn sec_rec_modify_check_and_lock(
        &mut self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        trx: TrxId,
    ) -> Result<LockStatus> {
        if flags.contains(GuardFlags::NO_LOCKING) {
            return Ok(LockStatus::Success);
        }
        debug_assert!(!index.clustered);
        self.debug_assert_intention(trx, index.table, LockMode::X);

        let status = self.rec_lock(
            true,
            LockMode::X,
            RecordLockFlags::REC_NOT_GAP,
            page,
            heap_no,
            index,
            trx,
        )?;
        Ok(granted_as_success(status))
    }

    /// Locking read of a secondary index record.
    ///
    /// A secondary record carries no transaction id. If the page was
    /// modified by a transaction that may still be active
    /// (`page_max_trx_id` not older than the oldest active one), the caller
    /// resolves the implicit owner through the clustered index and passes
    /// it as `impl_owner`.
    #[allow(clippy::too_many_arguments)]
    pub fn sec_rec_read_check_and_lock(
        &mut self,
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
        if flags.contains(GuardFlags::NO_LOCKING) {
            return Ok(LockStatus::Success);
        }
        debug_assert!(!index.clustered);
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        self.debug_assert_intention(trx, index.table, mode);

        if heap_no != PAGE_HEAP_NO_SUPREMUM && page_max_trx_id >= self.min_active_trx_id() {
            if let Some(owner) = impl_owner.filter(|&owner| owner != trx) {
                self.rec_convert_impl_to_expl(owner, page, heap_no, index);
            }
        }
        self.rec_lock(false, mode, gap_mode, page, heap_no, index, trx)
    }

    /// Locking read of a clustered index record last written by `rec_trx`.
    #[allow(clippy::too_many_arguments)]
    pub fn clust_rec_read_check_and_lock(
        &mut self,
        flags: GuardFlags,
        page: PageRef,
        heap_no: HeapNo,
        index: IndexRef,
        mode: LockMode,
        gap_mode: RecordLockFlags,
        trx: TrxId,
        rec_trx: TrxId,
    ) -> Result<LockStatus> {
        if flags.contains(GuardFlags::NO_LOCKING) {
            return Ok(LockStatus::Success);
        }
        debug_assert!(index.clustered);
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        self.debug_assert_intention(trx, index.table, mode);

        if heap_no != PAGE_HEAP_NO_SUPREMUM && rec_trx != trx {
            self.rec_convert_impl_to_expl(rec_trx, page, heap_no, index);
        }
        self.rec_lock(false, mode, gap_mode, page, heap_no, index, trx)
    }
}

/// Modify and insert callers do not distinguish a fresh lock bit from an
/// existing one.
fn granted_as_success(status: LockStatus) -> LockStatus {
    match status {
        LockStatus::SuccessLockedRec => LockStatus::Success,
        other => other,
    }
}
