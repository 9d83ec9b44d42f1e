// Table Lock Store
use super::compat;
use super::lock_sys::{fatal, LockSys, LockTarget};
use super::types::*;
use tracing::trace;

impl LockSys {
    pub fn table_locks(&self, table: TableId) -> Vec<LockId> {
        self.tables
            .get(&table)
            .map(|q| q.locks.clone())
            .unwrap_or_default()
    }

    /// Creates a table lock and appends it to the table queue.
    pub fn table_create(
        &mut self,
        table: TableId,
        mode: LockMode,
        wait: bool,
        trx: TrxId,
    ) -> LockId {
        let id = self.alloc_lock(trx, mode, RecordLockFlags::empty(), LockTarget::Table(table));
        let autoinc = mode == LockMode::AutoInc;
        let queue = self.tables.entry(table).or_default();
        queue.locks.push(id);

        if autoinc {
            queue.n_waiting_or_granted_auto_inc += 1;
            // Granted right away: take the table's AUTO_INC slot. A waiting
            // request gets it from grant().
            if !wait {
                queue.autoinc_trx = Some(trx);
            }
        }
        if autoinc && !wait {
            self.trx_mut(trx).autoinc_locks.push(Some(id));
        }
        if wait {
            self.set_lock_and_trx_wait(id);
        }
        self.stats.record_table_lock_created();
        trace!(lock = %id, trx = %trx, table = %table, mode = %mode, wait, "table lock created");
        id
    }

    /// Whether `trx` already holds a granted lock on the table at least as
    /// strong as `mode`.
    pub fn table_has(&self, trx: TrxId, table: TableId, mode: LockMode) -> Option<LockId> {
        self.tables.get(&table)?.locks.iter().rev().copied().find(|&id| {
            let lock = self.lock(id);
            lock.trx == trx && !lock.is_waiting() && compat::stronger_or_equal(lock.mode, mode)
        })
    }

    /// A lock of another transaction incompatible with `mode`; waiting
    /// requests count only when `wait` is set.
    pub fn table_other_has_incompatible(
        &self,
        trx: TrxId,
        wait: bool,
        table: TableId,
        mode: LockMode,
    ) -> Option<LockId> {
        self.tables.get(&table)?.locks.iter().rev().copied().find(|&id| {
            let lock = self.lock(id);
            lock.trx != trx
                && !compat::compatible(lock.mode, mode)
                && (wait || !lock.is_waiting())
        })
    }

    pub fn table_has_to_wait_in_queue(&self, wait_lock: LockId) -> bool {
        !self.blockers_of(wait_lock).is_empty()
    }

    /// Unlinks a table lock from its queue and its owner, keeping the
    /// AUTO_INC bookkeeping straight. Grants nothing.
    pub fn table_remove_low(&mut self, id: LockId) {
        let (trx, mode, waiting, table) = {
            let lock = self.lock(id);
            let table = match lock.target {
                LockTarget::Table(table) => table,
                LockTarget::Record(_) => fatal(format!("{} is not a table lock", id)),
            };
            (lock.trx, lock.mode, lock.is_waiting(), table)
        };

        if mode == LockMode::AutoInc {
            if let Some(queue) = self.tables.get_mut(&table) {
                // The slot may already have passed to another transaction.
                if queue.autoinc_trx == Some(trx) && !waiting {
                    queue.autoinc_trx = None;
                }
                if queue.n_waiting_or_granted_auto_inc == 0 {
                    fatal(format!("AUTO_INC count underflow on {}", table));
                }
                queue.n_waiting_or_granted_auto_inc -= 1;
            }
            if !waiting {
                if let Some(owner) = self.trxs.get_mut(&trx) {
                    owner.remove_autoinc(id);
                }
            }
        }

        if waiting {
            self.reset_lock_and_trx_wait(id);
        }
        if let Some(queue) = self.tables.get_mut(&table) {
            queue.locks.retain(|&l| l != id);
            if queue.locks.is_empty() && queue.n_waiting_or_granted_auto_inc == 0 {
                self.tables.remove(&table);
            }
        }
        self.free_lock(id);
    }

    /// Removes a table lock and grants waiters behind it that are now free.
    pub fn table_dequeue(&mut self, id: LockId) {
        let table = self.lock(id).table_id();
        let behind: Vec<LockId> = {
            let queue = self.table_locks(table);
            match queue.iter().position(|&l| l == id) {
                Some(pos) => queue[pos + 1..].to_vec(),
                None => Vec::new(),
            }
        };
        self.table_remove_low(id);
        for waiter in behind {
            let waiting = self.locks.get(&waiter).map_or(false, |l| l.is_waiting());
            if waiting && !self.table_has_to_wait_in_queue(waiter) {
                self.grant(waiter);
            }
        }
    }

    /// Releases the most recently granted AUTO_INC lock of the transaction.
    pub fn release_autoinc_last_lock(&mut self, trx: TrxId) -> bool {
        match self.trx(trx).last_autoinc() {
            Some(id) => {
                self.table_dequeue(id);
                true
            }
            None => false,
        }
    }

    /// Releases all AUTO_INC locks of the transaction, newest first.
    pub fn release_autoinc_locks(&mut self, trx: TrxId) {
        while self.release_autoinc_last_lock(trx) {}
        self.trx_mut(trx).autoinc_locks.clear();
    }
}
