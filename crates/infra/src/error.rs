use thiserror::Error;

use partsledger_core::DomainError;

/// Storage-level failure.
///
/// These are **infrastructure errors** (locking, drivers, decoding) as opposed
/// to the business failures in [`DomainError`]. A failed unit of work never
/// leaves partial state, so every variant is safe to retry from scratch;
/// `Contention` is the one where a retry is expected to help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock wait timed out, or the backend reported a serialization failure
    /// or deadlock.
    #[error("contention: {0}")]
    Contention(String),

    /// A unit of work touched a row outside its lock set.
    #[error("row not locked by this unit of work: {0}")]
    Unlocked(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Error returned by every ledger coordinator.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(e) => Some(e),
            LedgerError::Store(_) => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Domain(e) => e.code(),
            LedgerError::Store(StoreError::Contention(_)) => "contention",
            LedgerError::Store(_) => "store_error",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
