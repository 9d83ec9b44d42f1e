// Per-transaction lock state
use super::types::*;
use parking_lot::Condvar;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// How the last lock wait of a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Granted,
    /// Cancelled by a kill, a timeout or a record going away; the request
    /// is gone and the operation must be retried.
    Cancelled,
    /// Rolled back to break a deadlock someone else closed.
    ChosenAsVictim,
}

/// What the lock manager keeps for every registered transaction.
///
/// All fields are protected by the lock-table mutex.
pub(crate) struct TrxLocks {
    pub id: TrxId,
    pub isolation: IsolationLevel,
    pub modified_non_transactional: bool,
    /// Undo records written so far; the main input of the deadlock weight.
    pub undo_no: u64,
    /// Every lock object owned by the transaction, oldest first.
    pub locks: Vec<LockId>,
    /// The single outstanding lock request that is not granted yet.
    pub wait_lock: Option<LockId>,
    pub que_state: TrxQueState,
    pub wait_started: Option<Instant>,
    /// Why the last wait ended; `None` while waiting or before any wait.
    pub wait_outcome: Option<WaitOutcome>,
    /// Scratch flag of the deadlock search: subtree already explored.
    pub deadlock_mark: bool,
    /// Granted AUTO_INC locks in acquisition order; `None` marks a lock
    /// released out of order.
    pub autoinc_locks: Vec<Option<LockId>>,
    pub started_at: Instant,
    /// Commit or rollback has started; implicit locks of this transaction
    /// are no longer converted.
    pub releasing: bool,
    /// Signalled whenever the wait of this transaction ends.
    pub wakeup: Arc<Condvar>,
}

impl TrxLocks {
    pub fn new(id: TrxId, options: TrxOptions) -> Self {
        TrxLocks {
            id,
            isolation: options.isolation,
            modified_non_transactional: options.modified_non_transactional,
            undo_no: 0,
            locks: Vec::new(),
            wait_lock: None,
            que_state: TrxQueState::Running,
            wait_started: None,
            wait_outcome: None,
            deadlock_mark: false,
            autoinc_locks: Vec::new(),
            started_at: Instant::now(),
            releasing: false,
            wakeup: Arc::new(Condvar::new()),
        }
    }

    /// Work done so far: undo records plus lock objects held.
    pub fn weight(&self) -> u64 {
        self.undo_no + self.locks.len() as u64
    }

    /// Total order used to pick deadlock victims; the lighter side is rolled back.
    ///
    /// A transaction that touched non-transactional tables always outweighs one
    /// that did not. Equal weights fall back to age: the older (lower id)
    /// transaction is the heavier one.
    pub fn weight_cmp(&self, other: &TrxLocks) -> Ordering {
        self.modified_non_transactional
            .cmp(&other.modified_non_transactional)
            .then(self.weight().cmp(&other.weight()))
            .then(other.id.cmp(&self.id))
    }

    pub fn weight_ge(&self, other: &TrxLocks) -> bool {
        self.weight_cmp(other) != Ordering::Less
    }

    pub fn remove_lock(&mut self, lock: LockId) {
        if let Some(pos) = self.locks.iter().rposition(|&id| id == lock) {
            self.locks.remove(pos);
        }
    }

    /// Drops `lock` from the AUTO_INC stack. The common case is the top of the
    /// stack; anything else is tombstoned in place.
    pub fn remove_autoinc(&mut self, lock: LockId) -> bool {
        if self.autoinc_locks.last() == Some(&Some(lock)) {
            self.autoinc_locks.pop();
        } else if let Some(slot) = self
            .autoinc_locks
            .iter_mut()
            .rev()
            .find(|slot| **slot == Some(lock))
        {
            *slot = None;
        } else {
            return false;
        }
        while self.autoinc_locks.last() == Some(&None) {
            self.autoinc_locks.pop();
        }
        true
    }

    /// Most recently granted AUTO_INC lock still held.
    pub fn last_autoinc(&self) -> Option<LockId> {
        self.autoinc_locks.iter().rev().find_map(|slot| *slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trx(id: u64) -> TrxLocks {
        TrxLocks::new(TrxId(id), TrxOptions::default())
    }

    #[test]
    fn test_weight_order_is_total() {
        let a = trx(1);
        let b = trx(2);
        // Same work: the older transaction is heavier.
        assert!(a.weight_ge(&b));
        assert!(!b.weight_ge(&a));

        let mut c = trx(3);
        c.undo_no = 10;
        assert!(c.weight_ge(&a));

        let mut d = trx(4);
        d.modified_non_transactional = true;
        assert!(d.weight_ge(&c));
    }

    #[test]
    fn test_autoinc_stack_tombstones() {
        let mut t = trx(1);
        t.autoinc_locks = vec![Some(LockId(1)), Some(LockId(2)), Some(LockId(3))];

        assert!(t.remove_autoinc(LockId(2)));
        assert_eq!(t.autoinc_locks, vec![Some(LockId(1)), None, Some(LockId(3))]);
        assert_eq!(t.last_autoinc(), Some(LockId(3)));

        // Popping the top also sweeps the tombstone below it.
        assert!(t.remove_autoinc(LockId(3)));
        assert_eq!(t.autoinc_locks, vec![Some(LockId(1))]);
        assert!(!t.remove_autoinc(LockId(9)));
    }
}
