use super::money::Amount;
use super::obligation::{Obligation, ObligationKind, ObligationStatus};
use super::payment::{
    AttemptRecord, AuditEvent, DeductionRecord, PaymentNotice, PaymentOutcome, PaymentRecord,
    PaymentSource,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence port for obligations.
///
/// Mutations are optimistic: `set_status` carries a `from` guard and
/// `adjust_balance` carries the version the caller read. Implementations
/// must apply each mutation atomically; they never take a lock across calls.
#[async_trait]
pub trait ObligationStore: Send + Sync {
    /// Creates a new obligation in `pending` with the full principal
    /// outstanding. Fails with `InvalidAmount` before touching storage when
    /// the principal is not positive (enforced by `Amount` upstream).
    async fn create(
        &self,
        borrower_id: Uuid,
        kind: ObligationKind,
        principal: Amount,
        grace_deadline: NaiveDate,
    ) -> Result<Obligation>;

    async fn get(&self, id: Uuid) -> Result<Option<Obligation>>;

    /// Transitions status with an optimistic `from` guard. Fails with
    /// `InvalidTransition` when the stored status differs from `from` or
    /// when `to` is not reachable from `from`.
    async fn set_status(
        &self,
        id: Uuid,
        from: ObligationStatus,
        to: ObligationStatus,
    ) -> Result<Obligation>;

    /// Pending -> rejected, recording the authorizer's reason. Terminal.
    async fn reject(&self, id: Uuid, reason: String) -> Result<Obligation>;

    /// Reduces the outstanding balance by `reduction`, guarded by the
    /// version the caller read. Fails with `ConcurrentModification` when the
    /// stored version differs; callers re-read and retry. The reduction must
    /// already be capped so the result stays at or above zero.
    async fn adjust_balance(
        &self,
        id: Uuid,
        reduction: Amount,
        expected_version: u64,
    ) -> Result<Obligation>;

    /// All obligations for a borrower, oldest first (creation order).
    async fn list_by_borrower(&self, borrower_id: Uuid) -> Result<Vec<Obligation>>;

    /// All obligations currently in `active`, for the overdue sweep.
    async fn list_active(&self) -> Result<Vec<Obligation>>;

    /// Every obligation, creation order. Reporting surface.
    async fn list_all(&self) -> Result<Vec<Obligation>>;
}

/// Append-only record of payment attempts keyed by idempotency token.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Atomic insert-or-fetch on the token. `Fresh` means this call created
    /// the pending record and the caller owns its application; `Existing`
    /// means another delivery got there first and the caller must inspect
    /// the stored outcome instead of applying.
    async fn record_attempt(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
        source: PaymentSource,
    ) -> Result<AttemptRecord>;

    /// Moves a pending record to a terminal outcome. Settling to the same
    /// terminal outcome again is a no-op success; settling to a different
    /// terminal outcome fails with `AlreadySettled`.
    async fn settle(&self, token: &str, outcome: PaymentOutcome) -> Result<PaymentRecord>;

    async fn get(&self, token: &str) -> Result<Option<PaymentRecord>>;

    async fn payments_for_obligation(&self, obligation_id: Uuid) -> Result<Vec<PaymentRecord>>;

    /// Appends deduction lineage. Distinct from `record_attempt`: the
    /// deduction also flows through the payment ledger for idempotency, this
    /// entry only adds the balance-before/after audit trail.
    async fn record_deduction(&self, record: DeductionRecord) -> Result<()>;

    async fn deductions_for_borrower(&self, borrower_id: Uuid) -> Result<Vec<DeductionRecord>>;
}

/// Outbound notification collaborator. Best-effort and post-commit: a
/// failure here never rolls back a financial mutation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notice: PaymentNotice) -> Result<()>;
}

/// Outbound audit-log collaborator. Entries are immutable once appended.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
}

pub type ObligationStoreRef = Arc<dyn ObligationStore>;
pub type PaymentLedgerRef = Arc<dyn PaymentLedger>;
pub type NotificationSinkRef = Arc<dyn NotificationSink>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
