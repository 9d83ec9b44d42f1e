// Deadlock Detection
//
// Bounded depth-first search of the waits-for graph, starting from the
// transaction that just enqueued a waiting lock. The graph is never
// materialized: the edges of a waiting transaction are the locks ahead of
// its wait lock in the same queue that it has to wait for.
use super::lock_sys::LockSys;
use super::trx::WaitOutcome;
use super::types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockOutcome {
    NoDeadlock,
    /// The requesting transaction is the victim.
    VictimIsStart,
    /// Another transaction in the cycle was rolled back; search again.
    VictimIsOther,
    /// Search bounds hit; the requester is treated as the victim.
    ExceedMaxDepth,
}

/// One transaction in a reported cycle and the lock it waits for.
#[derive(Debug, Clone, Serialize)]
pub struct DeadlockParticipant {
    pub trx: TrxId,
    pub weight: u64,
    pub waiting_for: String,
}

/// The "latest detected deadlock" section of the status dump.
#[derive(Debug, Clone, Serialize)]
pub struct DeadlockReport {
    pub detected_at: DateTime<Utc>,
    pub participants: Vec<DeadlockParticipant>,
    pub victim: TrxId,
    pub exceeded_bounds: bool,
}

impl DeadlockReport {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.detected_at.format("%Y-%m-%d %H:%M:%S"));
        if self.exceeded_bounds {
            out.push_str(
                "TOO DEEP OR LONG SEARCH IN THE LOCK TABLE WAITS-FOR GRAPH, WE WILL ROLL BACK FOLLOWING TRANSACTION\n",
            );
        }
        for (i, p) in self.participants.iter().enumerate() {
            let _ = writeln!(out, "*** ({}) TRANSACTION {}, weight {}", i + 1, p.trx, p.weight);
            let _ = writeln!(out, "*** ({}) WAITING FOR THIS LOCK TO BE GRANTED:", i + 1);
            let _ = writeln!(out, "{}", p.waiting_for);
        }
        let _ = writeln!(out, "*** WE ROLL BACK TRANSACTION {}", self.victim);
        out
    }
}

struct Frame {
    trx: TrxId,
    wait_lock: LockId,
    blockers: Vec<LockId>,
    next: usize,
    depth: usize,
}

impl LockSys {
    /// Checks whether the new wait lock of `trx` closes a cycle.
    ///
    /// Returns true if `trx` was chosen as the victim (or the search was too
    /// expensive). When another transaction is chosen its wait is cancelled
    /// in place and the search starts over, since the marks are stale.
    pub fn deadlock_occurs(&mut self, wait_lock: LockId, trx: TrxId) -> bool {
        loop {
            for t in self.trxs.values_mut() {
                t.deadlock_mark = false;
            }
            let mut cost = 0u64;
            match self.deadlock_search(trx, wait_lock, &mut cost) {
                DeadlockOutcome::NoDeadlock => return false,
                DeadlockOutcome::VictimIsOther => continue,
                DeadlockOutcome::VictimIsStart => {
                    self.stats.record_deadlock();
                    return true;
                }
                DeadlockOutcome::ExceedMaxDepth => {
                    warn!(
                        trx = %trx,
                        cost,
                        "deadlock search exceeded its bounds; rolling back the requester"
                    );
                    self.stats.record_search_bound_exceeded();
                    self.stats.record_deadlock();
                    return true;
                }
            }
        }
    }

    fn deadlock_frame(&self, trx: TrxId, wait_lock: LockId, depth: usize) -> Frame {
        Frame {
            trx,
            wait_lock,
            blockers: self.blockers_of(wait_lock),
            next: 0,
            depth,
        }
    }

    pub(crate) fn deadlock_search(
        &mut self,
        start: TrxId,
        wait_lock: LockId,
        cost: &mut u64,
    ) -> DeadlockOutcome {
        let max_depth = self.config.max_deadlock_depth;
        let max_steps = self.config.max_deadlock_steps;

        *cost += 1;
        let mut stack = vec![self.deadlock_frame(start, wait_lock, 0)];

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.blockers.len() {
                // Subtree fully explored without reaching `start`.
                let done = frame.trx;
                stack.pop();
                self.trx_mut(done).deadlock_mark = true;
                continue;
            }
            let blocker = frame.blockers[frame.next];
            frame.next += 1;
            let (frame_trx, frame_wait, depth) = (frame.trx, frame.wait_lock, frame.depth);

            let lock_trx = self.lock(blocker).trx;
            let too_far = depth > max_depth || *cost > max_steps;

            if lock_trx == start {
                let chain: Vec<(TrxId, LockId)> =
                    stack.iter().map(|f| (f.trx, f.wait_lock)).collect();
                return self.resolve_cycle(start, frame_trx, frame_wait, &chain);
            }

            if too_far {
                let chain: Vec<(TrxId, LockId)> =
                    stack.iter().map(|f| (f.trx, f.wait_lock)).collect();
                self.record_deadlock_report(&chain, start, true);
                return DeadlockOutcome::ExceedMaxDepth;
            }

            if let Some(next_wait) = self.trx(lock_trx).wait_lock {
                *cost += 1;
                if !self.trx(lock_trx).deadlock_mark {
                    let next = self.deadlock_frame(lock_trx, next_wait, depth + 1);
                    stack.push(next);
                }
            }
        }
        DeadlockOutcome::NoDeadlock
    }

    /// A cycle through `start` was closed by the transaction `tail`, waiting
    /// on `tail_wait`. The lighter of the two is rolled back.
    fn resolve_cycle(
        &mut self,
        start: TrxId,
        tail: TrxId,
        tail_wait: LockId,
        chain: &[(TrxId, LockId)],
    ) -> DeadlockOutcome {
        if self.trx(tail).weight_ge(self.trx(start)) {
            self.record_deadlock_report(chain, start, false);
            return DeadlockOutcome::VictimIsStart;
        }

        self.record_deadlock_report(chain, tail, false);
        self.cancel_waiting_and_release(tail_wait);
        self.set_wait_outcome(tail, WaitOutcome::ChosenAsVictim);
        self.stats.record_deadlock();
        self.stats.record_victim_other();
        DeadlockOutcome::VictimIsOther
    }

    fn record_deadlock_report(
        &mut self,
        chain: &[(TrxId, LockId)],
        victim: TrxId,
        exceeded_bounds: bool,
    ) {
        let participants = chain
            .iter()
            .map(|&(trx, lock)| DeadlockParticipant {
                trx,
                weight: self.trx(trx).weight(),
                waiting_for: self.describe_lock(lock),
            })
            .collect();
        let report = DeadlockReport {
            detected_at: Utc::now(),
            participants,
            victim,
            exceeded_bounds,
        };
        info!(
            victim = %victim,
            cycle_len = chain.len(),
            exceeded_bounds,
            "deadlock detected"
        );
        if self.config.print_all_deadlocks {
            info!("LATEST DETECTED DEADLOCK\n{}", report.to_text());
        }
        self.last_deadlock = Some(report);
    }
}
