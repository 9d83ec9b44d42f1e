use crate::lock::TrxId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Deadlock found when trying to get lock; {trx} was chosen as victim, try restarting transaction")]
    Deadlock { trx: TrxId },

    #[error("Lock wait timeout exceeded for {trx}; try restarting transaction")]
    LockWaitTimeout { trx: TrxId },

    #[error("Lock wait of {trx} was cancelled; retry the operation")]
    LockWaitCancelled { trx: TrxId },

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TrxId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock table corruption: {0}")]
    Corruption(String),
}

impl Error {
    /// True for errors after which the caller must roll back the transaction.
    pub fn is_rollback_required(&self) -> bool {
        matches!(self, Error::Deadlock { .. } | Error::LockWaitTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
