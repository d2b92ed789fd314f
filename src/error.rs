use crate::domain::obligation::ObligationStatus;
use crate::domain::payment::PaymentOutcome;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Principal or payment amount was zero or negative.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The requested status change is not reachable from the stored status,
    /// or the stored status no longer matches the caller's `from` guard.
    #[error("invalid transition for obligation {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: ObligationStatus,
        to: ObligationStatus,
    },

    /// Optimistic-concurrency failure on a balance mutation. Retryable:
    /// re-read the obligation and try again with the fresh version.
    #[error(
        "concurrent modification of obligation {id}: expected version {expected}, found {found}"
    )]
    ConcurrentModification { id: Uuid, expected: u64, found: u64 },

    /// The balance CAS retry budget was exhausted. The payment attempt stays
    /// `pending` in the ledger and needs manual reconciliation.
    #[error("reconciliation conflict for token {token}: retry budget exhausted")]
    ReconciliationConflict { token: String },

    /// A concurrent delivery of the same token found the attempt still
    /// pending: another handler is mid-application. Callers retry once it
    /// settles; a record stranded pending by a crash needs manual
    /// reconciliation.
    #[error("payment {token} is already in flight")]
    PaymentInFlight { token: String },

    /// A settle call tried to move an already-terminal record to a different
    /// terminal outcome.
    #[error("payment {token} already settled as {existing:?}, refusing {requested:?}")]
    AlreadySettled {
        token: String,
        existing: PaymentOutcome,
        requested: PaymentOutcome,
    },

    /// Benign for callers: the borrower has nothing left to deduct against.
    #[error("borrower {borrower_id} has no obligations with outstanding balance")]
    NoOutstandingObligations { borrower_id: Uuid },

    /// Benign for the sweep: the obligation is already fully repaid.
    #[error("obligation {id} has zero outstanding balance, nothing to mark overdue")]
    NothingToMark { id: Uuid },

    /// The borrower has an overdue obligation and may not open a new one.
    #[error("borrower {borrower_id} is blocked from new obligations (overdue balance)")]
    BorrowerBlocked { borrower_id: Uuid },

    #[error("obligation {0} not found")]
    ObligationNotFound(Uuid),

    #[error("payment {0} not found")]
    PaymentNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Errors the reconciliation loop may retry after a re-read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification { .. })
    }
}
