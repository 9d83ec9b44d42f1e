// Human-readable lock and transaction dumps
use super::lock_sys::{LockSys, LockTarget};
use super::types::*;
use serde::Serialize;
use std::fmt::Write;

/// One row of the lock-table view: a lock someone waits for or that blocks
/// somebody.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockInfo {
    pub lock_id: String,
    pub lock_trx_id: TrxId,
    pub lock_mode: String,
    pub lock_type: &'static str,
    pub lock_table: TableId,
    pub lock_index: Option<IndexId>,
    pub lock_space: Option<u32>,
    pub lock_page: Option<u32>,
    pub lock_rec: Option<HeapNo>,
    pub waiting: bool,
}

/// A waits-for edge between two locks.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockWaitInfo {
    pub requesting_trx_id: TrxId,
    pub requested_lock_id: String,
    pub blocking_trx_id: TrxId,
    pub blocking_lock_id: String,
}

impl LockSys {
    /// Text form of one lock, in the style of the engine status output.
    pub fn describe_lock(&self, id: LockId) -> String {
        let lock = match self.locks.get(&id) {
            Some(lock) => lock,
            None => return format!("{} (released)", id),
        };
        let mut out = String::new();
        match &lock.target {
            LockTarget::Record(rec) => {
                let _ = write!(
                    out,
                    "RECORD LOCKS {} n bits {} index {} of {} trx id {} lock_mode {}",
                    rec.page,
                    rec.bits.n_bits(),
                    rec.index.id.0,
                    rec.index.table,
                    lock.trx.0,
                    lock.mode
                );
                if lock.is_gap() {
                    out.push_str(" locks gap before rec");
                }
                if lock.is_rec_not_gap() {
                    out.push_str(" locks rec but not gap");
                }
                if lock.is_insert_intention() {
                    out.push_str(" insert intention");
                }
                if lock.is_waiting() {
                    out.push_str(" waiting");
                }
                for heap_no in rec.bits.iter_set() {
                    let _ = write!(out, "\nRecord lock, heap no {}", heap_no);
                    match heap_no {
                        PAGE_HEAP_NO_INFIMUM => out.push_str(" (infimum)"),
                        PAGE_HEAP_NO_SUPREMUM => out.push_str(" (supremum)"),
                        _ => {}
                    }
                }
            }
            LockTarget::Table(table) => {
                let _ = write!(out, "TABLE LOCK {} trx id {} lock mode {}", table, lock.trx.0, lock.mode);
                if lock.is_waiting() {
                    out.push_str(" waiting");
                }
            }
        }
        out
    }

    /// Stable identifier of a lock as shown in the lock-table view.
    fn lock_info_id(&self, id: LockId) -> String {
        let lock = self.lock(id);
        match &lock.target {
            LockTarget::Record(rec) => format!(
                "{}:{}:{}:{}",
                lock.trx.0,
                rec.page.space,
                rec.page.page_no,
                rec.bits.first_set().unwrap_or(PAGE_HEAP_NO_INFIMUM)
            ),
            LockTarget::Table(table) => format!("{}:{}", lock.trx.0, table.0),
        }
    }

    pub fn lock_info(&self, id: LockId) -> LockInfo {
        let lock = self.lock(id);
        let rec = lock.rec();
        LockInfo {
            lock_id: self.lock_info_id(id),
            lock_trx_id: lock.trx,
            lock_mode: lock.request().mode_string(),
            lock_type: lock.kind().as_str(),
            lock_table: lock.table_id(),
            lock_index: rec.map(|r| r.index.id),
            lock_space: rec.map(|r| r.page.space),
            lock_page: rec.map(|r| r.page.page_no),
            lock_rec: rec.and_then(|r| r.bits.first_set()),
            waiting: lock.is_waiting(),
        }
    }

    /// Every waiting lock and every lock blocking one, plus the edges.
    pub fn lock_waits(&self) -> (Vec<LockInfo>, Vec<LockWaitInfo>) {
        let mut infos: Vec<LockInfo> = Vec::new();
        let mut edges = Vec::new();
        let mut seen = ahash::AHashSet::new();

        for trx in self.trxs.values() {
            let Some(wait_lock) = trx.wait_lock else {
                continue;
            };
            if seen.insert(wait_lock) {
                infos.push(self.lock_info(wait_lock));
            }
            for blocker in self.blockers_of(wait_lock) {
                if seen.insert(blocker) {
                    infos.push(self.lock_info(blocker));
                }
                edges.push(LockWaitInfo {
                    requesting_trx_id: trx.id,
                    requested_lock_id: self.lock_info_id(wait_lock),
                    blocking_trx_id: self.lock(blocker).trx,
                    blocking_lock_id: self.lock_info_id(blocker),
                });
            }
        }
        (infos, edges)
    }

    pub fn print_info_summary(&self) -> String {
        let mut out = String::new();
        out.push_str("------------\nTRANSACTIONS\n------------\n");
        let _ = writeln!(out, "Trx id counter {}", self.next_trx_id);
        let _ = writeln!(
            out,
            "Total number of lock structs in row lock hash table {}",
            self.locks.values().filter(|l| l.kind() == LockKind::Record).count()
        );
        if let Some(report) = &self.last_deadlock {
            out.push_str("------------------------\nLATEST DETECTED DEADLOCK\n------------------------\n");
            out.push_str(&report.to_text());
        }
        out
    }

    /// Status block of one transaction and all its locks.
    pub fn print_trx(&self, trx: TrxId) -> Option<String> {
        let t = self.trxs.get(&trx)?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "---TRANSACTION {}, ACTIVE {} sec{}",
            t.id,
            t.started_at.elapsed().as_secs(),
            if t.que_state == TrxQueState::LockWait { " LOCK WAIT" } else { "" }
        );
        let _ = writeln!(
            out,
            "{} lock struct(s), {} row lock(s), undo log entries {}",
            t.locks.len(),
            self.number_of_rows_locked(trx),
            t.undo_no
        );
        if let (Some(wait_lock), Some(started)) = (t.wait_lock, t.wait_started) {
            let _ = writeln!(
                out,
                "------- TRX HAS BEEN WAITING {} SEC FOR THIS LOCK TO BE GRANTED:",
                started.elapsed().as_secs()
            );
            let _ = writeln!(out, "{}", self.describe_lock(wait_lock));
            out.push_str("------------------\n");
        }
        for &id in &t.locks {
            let _ = writeln!(out, "{}", self.describe_lock(id));
        }
        Some(out)
    }
}
