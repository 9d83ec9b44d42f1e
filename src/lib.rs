//! MantisDB Lock Manager
//!
//! Row and table locking for the B-tree storage engine: next-key record
//! locks kept as per-page bitmaps, intention and AUTO_INC table locks, FIFO
//! wait queues, bounded deadlock detection and lock inheritance when pages
//! are split, merged or reorganized.

pub mod config;
pub mod error;
pub mod lock;
pub mod stats;

pub use config::{LockSysConfig, LockSysConfigBuilder};
pub use error::{Error, Result};
pub use lock::LockManager;
pub use stats::{LockStats, LockStatsSnapshot};
