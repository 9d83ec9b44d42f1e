// Lock System Module
// Record and table locks, wait queues, deadlock detection, page reorganization

pub mod bitmap;
pub mod compat;
pub mod deadlock;
mod grant;
mod guard;
mod inherit;
pub mod lock_manager;
mod lock_sys;
pub mod print;
mod record;
mod release;
mod table;
mod trx;
pub mod types;
mod validate;

pub use bitmap::LockBitmap;
pub use compat::{compatible, stronger_or_equal};
pub use deadlock::{DeadlockOutcome, DeadlockParticipant, DeadlockReport};
pub use lock_manager::*;
pub use print::{LockInfo, LockWaitInfo};
pub use types::*;
