//! Lock system statistics (lock-free counters)

use atomic::{Atomic, Ordering};
use serde::Serialize;

/// Counters updated under the lock-table mutex but readable without it.
pub struct LockStats {
    rec_locks_created: Atomic<u64>,
    table_locks_created: Atomic<u64>,
    lock_waits: Atomic<u64>,
    grants_after_wait: Atomic<u64>,
    deadlocks: Atomic<u64>,
    victims_other: Atomic<u64>,
    search_bound_exceeded: Atomic<u64>,
    wait_timeouts: Atomic<u64>,
    cancelled_waits: Atomic<u64>,
}

/// Point-in-time copy of [`LockStats`].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    pub rec_locks_created: u64,
    pub table_locks_created: u64,
    pub lock_waits: u64,
    pub grants_after_wait: u64,
    pub deadlocks: u64,
    pub victims_other: u64,
    pub search_bound_exceeded: u64,
    pub wait_timeouts: u64,
    pub cancelled_waits: u64,
}

impl LockStats {
    pub fn new() -> Self {
        Self {
            rec_locks_created: Atomic::new(0),
            table_locks_created: Atomic::new(0),
            lock_waits: Atomic::new(0),
            grants_after_wait: Atomic::new(0),
            deadlocks: Atomic::new(0),
            victims_other: Atomic::new(0),
            search_bound_exceeded: Atomic::new(0),
            wait_timeouts: Atomic::new(0),
            cancelled_waits: Atomic::new(0),
        }
    }

    #[inline]
    fn bump(counter: &Atomic<u64>) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rec_lock_created(&self) {
        Self::bump(&self.rec_locks_created);
    }

    pub fn record_table_lock_created(&self) {
        Self::bump(&self.table_locks_created);
    }

    pub fn record_wait(&self) {
        Self::bump(&self.lock_waits);
    }

    pub fn record_grant_after_wait(&self) {
        Self::bump(&self.grants_after_wait);
    }

    pub fn record_deadlock(&self) {
        Self::bump(&self.deadlocks);
    }

    pub fn record_victim_other(&self) {
        Self::bump(&self.victims_other);
    }

    pub fn record_search_bound_exceeded(&self) {
        Self::bump(&self.search_bound_exceeded);
    }

    pub fn record_wait_timeout(&self) {
        Self::bump(&self.wait_timeouts);
    }

    pub fn record_cancelled_wait(&self) {
        Self::bump(&self.cancelled_waits);
    }

    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            rec_locks_created: self.rec_locks_created.load(Ordering::Relaxed),
            table_locks_created: self.table_locks_created.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            grants_after_wait: self.grants_after_wait.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            victims_other: self.victims_other.load(Ordering::Relaxed),
            search_bound_exceeded: self.search_bound_exceeded.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            cancelled_waits: self.cancelled_waits.load(Ordering::Relaxed),
        }
    }
}

impl Default for LockStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = LockStats::new();
        stats.record_wait();
        stats.record_wait();
        stats.record_deadlock();

        let snap = stats.snapshot();
        assert_eq!(snap.lock_waits, 2);
        assert_eq!(snap.deadlocks, 1);
        assert_eq!(snap.rec_locks_created, 0);

        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["lock_waits"], 2);
    }
}
