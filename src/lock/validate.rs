// Lock table consistency checks
use super::lock_sys::{LockSys, LockTarget};
use super::types::*;
use crate::error::{Error, Result};

impl LockSys {
    /// Full scan of the lock table. Any mismatch means the lock table is
    /// corrupt; callers on the hot path treat an error as fatal.
    pub fn validate(&self) -> Result<()> {
        self.validate_arena()?;
        for (&table, queue) in &self.tables {
            self.validate_table_queue(table, &queue.locks)?;
        }
        for (&page, queue) in &self.rec_hash {
            self.validate_page(page, queue)?;
        }
        self.validate_trxs()
    }

    fn validate_arena(&self) -> Result<()> {
        for lock in self.locks.values() {
            let owner = self.trxs.get(&lock.trx).ok_or_else(|| {
                corruption(format!("{} owned by unregistered {}", lock.id, lock.trx))
            })?;
            if !owner.locks.contains(&lock.id) {
                return Err(corruption(format!(
                    "{} missing from the lock list of {}",
                    lock.id, lock.trx
                )));
            }
            let queued = match &lock.target {
                LockTarget::Record(rec) => self
                    .rec_hash
                    .get(&rec.page)
                    .map_or(false, |q| q.contains(&lock.id)),
                LockTarget::Table(table) => self
                    .tables
                    .get(table)
                    .map_or(false, |q| q.locks.contains(&lock.id)),
            };
            if !queued {
                return Err(corruption(format!("{} is not in any queue", lock.id)));
            }
            if lock.is_waiting() && owner.wait_lock != Some(lock.id) {
                return Err(corruption(format!(
                    "{} waits but is not the wait lock of {}",
                    lock.id, lock.trx
                )));
            }
        }
        Ok(())
    }

    fn validate_table_queue(&self, table: TableId, queue: &[LockId]) -> Result<()> {
        let mut autoinc = 0;
        for &id in queue {
            let lock = self.locks.get(&id).ok_or_else(|| {
                corruption(format!("{} in queue of {} but not in the arena", id, table))
            })?;
            if lock.mode == LockMode::AutoInc {
                autoinc += 1;
            }
            if lock.is_waiting() && !self.table_has_to_wait_in_queue(id) {
                return Err(corruption(format!(
                    "{} on {} waits although nothing blocks it",
                    id, table
                )));
            }
        }
        let counted = self
            .tables
            .get(&table)
            .map_or(0, |q| q.n_waiting_or_granted_auto_inc);
        if counted != autoinc {
            return Err(corruption(format!(
                "{} counts {} AUTO_INC locks, queue has {}",
                table, counted, autoinc
            )));
        }
        Ok(())
    }

    fn validate_page(&self, page: PageId, queue: &[LockId]) -> Result<()> {
        if queue.is_empty() {
            return Err(corruption(format!("empty lock queue kept for {}", page)));
        }
        let mut heap_nos = Vec::new();
        for &id in queue {
            let lock = self.locks.get(&id).ok_or_else(|| {
                corruption(format!("{} in queue of {} but not in the arena", id, page))
            })?;
            let rec = lock
                .rec()
                .ok_or_else(|| corruption(format!("table lock {} in record queue", id)))?;
            if rec.page != page {
                return Err(corruption(format!("{} of {} queued under {}", id, rec.page, page)));
            }
            heap_nos.extend(rec.bits.iter_set());
        }
        heap_nos.sort_unstable();
        heap_nos.dedup();
        for heap_no in heap_nos {
            self.validate_rec_queue(page, heap_no)?;
        }
        Ok(())
    }

    /// Granted locks on one record are mutually compatible; waiting ones are
    /// really blocked.
    pub fn validate_rec_queue(&self, page: PageId, heap_no: HeapNo) -> Result<()> {
        for id in self.rec_locks(page, heap_no) {
            let lock = self.lock(id);
            if lock.is_waiting() {
                if !self.rec_has_to_wait_in_queue(id) {
                    return Err(corruption(format!(
                        "{} waits on {} heap no {} although nothing blocks it",
                        id, page, heap_no
                    )));
                }
                continue;
            }
            if heap_no == PAGE_HEAP_NO_SUPREMUM || lock.is_gap() || lock.is_insert_intention() {
                continue;
            }
            let opposite = match lock.mode {
                LockMode::S => LockMode::X,
                _ => LockMode::S,
            };
            if let Some(other) =
                self.rec_other_has_expl_req(opposite, false, false, page, heap_no, lock.trx)
            {
                return Err(corruption(format!(
                    "granted {} conflicts with granted {} on {} heap no {}",
                    self.describe_lock(id),
                    self.describe_lock(other),
                    page,
                    heap_no
                )));
            }
        }
        Ok(())
    }

    fn validate_trxs(&self) -> Result<()> {
        for trx in self.trxs.values() {
            if let Some(wait_lock) = trx.wait_lock {
                let lock = self.locks.get(&wait_lock).ok_or_else(|| {
                    corruption(format!("wait lock {} of {} does not exist", wait_lock, trx.id))
                })?;
                if !lock.is_waiting() || lock.trx != trx.id {
                    return Err(corruption(format!(
                        "wait lock {} of {} is not a waiting lock of it",
                        wait_lock, trx.id
                    )));
                }
            }
            for &id in &trx.locks {
                if !self.locks.contains_key(&id) {
                    return Err(corruption(format!("{} lists freed {}", trx.id, id)));
                }
            }
        }
        Ok(())
    }
}

fn corruption(msg: String) -> Error {
    tracing::error!(target: "mantisdb_lock", "lock table validation failed: {}", msg);
    Error::Corruption(msg)
}

#[cfg(test)]
mod tests {
    use crate::config::LockSysConfig;
    use crate::error::Error;
    use crate::lock::lock_sys::LockSys;
    use crate::lock::types::*;

    fn locked_sys() -> (LockSys, TrxId) {
        let mut sys = LockSys::for_test(LockSysConfig::default());
        let trx = sys.begin_test_trx();
        sys.lock_table(trx, TableId(1), LockMode::IX).unwrap();
        sys.rec_lock(
            false,
            LockMode::X,
            RecordLockFlags::REC_NOT_GAP,
            PageRef::new(0, 4, 8),
            3,
            IndexRef::clustered(1, TableId(1)),
            trx,
        )
        .unwrap();
        (sys, trx)
    }

    #[test]
    fn test_consistent_table_passes() {
        let (sys, _) = locked_sys();
        sys.validate().unwrap();
    }

    #[test]
    fn test_lock_missing_from_owner_list() {
        let (mut sys, trx) = locked_sys();
        sys.trx_mut(trx).locks.pop();
        assert!(matches!(sys.validate(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_lock_missing_from_page_queue() {
        let (mut sys, _) = locked_sys();
        sys.rec_hash.clear();
        let err = sys.validate().unwrap_err();
        assert!(err.to_string().contains("not in any queue"));
    }
}
