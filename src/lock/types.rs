// Lock System Types
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense slot number of a record on its page.
pub type HeapNo = usize;

/// Page infimum: the sentinel before the first user record.
pub const PAGE_HEAP_NO_INFIMUM: HeapNo = 0;
/// Page supremum: the sentinel after the last user record.
pub const PAGE_HEAP_NO_SUPREMUM: HeapNo = 1;
/// First heap number used by a user record.
pub const PAGE_HEAP_NO_USER_LOW: HeapNo = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrxId(pub u64);

impl TrxId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trx:{}", self.0)
    }
}

/// Stable arena index of a lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u64);

/// Page identity: tablespace id plus page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub space: u32,
    pub page_no: u32,
}

impl PageId {
    pub fn new(space: u32, page_no: u32) -> Self {
        PageId { space, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space id {} page no {}", self.space, self.page_no)
    }
}

/// A page as the B-tree layer hands it to the lock manager.
///
/// `n_heap` is the number of heap slots currently allocated on the page
/// (infimum and supremum included); it sizes new record lock bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub id: PageId,
    pub n_heap: usize,
}

impl PageRef {
    pub fn new(space: u32, page_no: u32, n_heap: usize) -> Self {
        PageRef {
            id: PageId::new(space, page_no),
            n_heap,
        }
    }
}

/// Index identity carried by every record lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRef {
    pub id: IndexId,
    pub table: TableId,
    pub clustered: bool,
}

impl IndexRef {
    pub fn clustered(id: u64, table: TableId) -> Self {
        IndexRef {
            id: IndexId(id),
            table,
            clustered: true,
        }
    }

    pub fn secondary(id: u64, table: TableId) -> Self {
        IndexRef {
            id: IndexId(id),
            table,
            clustered: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Intention shared
    IS,
    /// Intention exclusive
    IX,
    S,
    X,
    /// Table-level lock held while generating an auto-increment value
    AutoInc,
}

impl LockMode {
    pub const ALL: [LockMode; 5] = [
        LockMode::IS,
        LockMode::IX,
        LockMode::S,
        LockMode::X,
        LockMode::AutoInc,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            LockMode::IS => 0,
            LockMode::IX => 1,
            LockMode::S => 2,
            LockMode::X => 3,
            LockMode::AutoInc => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::IS => "IS",
            LockMode::IX => "IX",
            LockMode::S => "S",
            LockMode::X => "X",
            LockMode::AutoInc => "AUTO_INC",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Type bits that refine a lock mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordLockFlags: u8 {
        /// Locks only the gap before the record.
        const GAP = 0x01;
        /// Locks only the record, never the gap before it.
        const REC_NOT_GAP = 0x02;
        /// Gap lock of a pending insert; blocks nobody.
        const INSERT_INTENTION = 0x04;
        /// Not yet granted. Also used on table locks.
        const WAIT = 0x08;
    }
}

impl RecordLockFlags {
    /// Flags that describe which part of the record is locked.
    pub const GAP_MODE: RecordLockFlags = RecordLockFlags::GAP.union(RecordLockFlags::REC_NOT_GAP);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    Record,
    Table,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Record => "RECORD",
            LockKind::Table => "TABLE",
        }
    }
}

/// A lock request: what kind of object, which mode and which refinement bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRequest {
    pub kind: LockKind,
    pub mode: LockMode,
    pub flags: RecordLockFlags,
}

impl LockRequest {
    pub fn record(mode: LockMode, flags: RecordLockFlags) -> Self {
        LockRequest {
            kind: LockKind::Record,
            mode,
            flags,
        }
    }

    pub fn table(mode: LockMode) -> Self {
        LockRequest {
            kind: LockKind::Table,
            mode,
            flags: RecordLockFlags::empty(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.flags.contains(RecordLockFlags::WAIT)
    }

    pub fn is_gap(&self) -> bool {
        self.flags.contains(RecordLockFlags::GAP)
    }

    pub fn is_rec_not_gap(&self) -> bool {
        self.flags.contains(RecordLockFlags::REC_NOT_GAP)
    }

    pub fn is_insert_intention(&self) -> bool {
        self.flags.contains(RecordLockFlags::INSERT_INTENTION)
    }

    /// Same request with the WAIT bit set or cleared.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.flags.set(RecordLockFlags::WAIT, wait);
        self
    }

    /// Mode string as shown in lock dumps, e.g. `X,REC_NOT_GAP`.
    pub fn mode_string(&self) -> String {
        let mut s = String::from(self.mode.as_str());
        if self.is_gap() {
            s.push_str(",GAP");
        }
        if self.is_rec_not_gap() {
            s.push_str(",REC_NOT_GAP");
        }
        if self.is_insert_intention() {
            s.push_str(",INSERT_INTENTION");
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

/// Query-thread state of a transaction, as far as locking is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrxQueState {
    Running,
    LockWait,
}

/// Outcome of a lock request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Granted; no new lock state was needed.
    Success,
    /// Granted; a new explicit lock bit was set for the transaction.
    SuccessLockedRec,
    /// A waiting lock was enqueued; the caller must suspend.
    LockWait,
}

impl LockStatus {
    pub fn is_granted(&self) -> bool {
        !matches!(self, LockStatus::LockWait)
    }
}

/// Result of the insert guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertCheck {
    pub status: LockStatus,
    /// The successor carries locks; the caller must call `update_insert`
    /// after the record is inserted.
    pub inherit: bool,
}

bitflags! {
    /// Options passed by the row-operations layer to the guards.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GuardFlags: u8 {
        /// Skip locking entirely (e.g. the caller works on a private copy).
        const NO_LOCKING = 0x01;
    }
}

/// Old and new heap number of one record moved by the B-tree layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapMove {
    pub old: HeapNo,
    pub new: HeapNo,
}

impl HeapMove {
    pub fn new(old: HeapNo, new: HeapNo) -> Self {
        HeapMove { old, new }
    }
}

/// Options for registering a transaction with the lock manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrxOptions {
    pub isolation: IsolationLevel,
    /// The transaction modified tables that cannot be rolled back; it is
    /// never preferred as a deadlock victim over one that did not.
    pub modified_non_transactional: bool,
}
