use super::money::{Amount, Balance};
use super::obligation::ObligationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Pending,
    Successful,
    Failed,
}

impl PaymentOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentOutcome::Pending)
    }
}

/// Where a payment event entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    ProviderCallback,
    LocalConfirmation,
    FinanceSystemDeduction,
}

/// One payment attempt and its terminal outcome, keyed by the caller's
/// idempotency token. For a given token the outcome moves `pending ->
/// successful` or `pending -> failed` exactly once; re-delivery of a
/// terminal token returns this record unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub idempotency_token: String,
    pub obligation_id: Uuid,
    pub amount: Amount,
    pub outcome: PaymentOutcome,
    pub source: PaymentSource,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Result of the atomic insert-or-fetch on an idempotency token.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptRecord {
    /// The token was unseen; this call created the pending record and the
    /// caller owns its application.
    Fresh(PaymentRecord),
    /// The token already had a record. The caller must act on the stored
    /// outcome instead of applying; a still-pending record means another
    /// delivery is mid-application.
    Existing(PaymentRecord),
}

impl PaymentRecord {
    pub fn attempt(
        token: impl Into<String>,
        obligation_id: Uuid,
        amount: Amount,
        source: PaymentSource,
    ) -> Self {
        Self {
            idempotency_token: token.into(),
            obligation_id,
            amount,
            outcome: PaymentOutcome::Pending,
            source,
            created_at: Utc::now(),
            settled_at: None,
        }
    }
}

/// Extra lineage logged for deductions triggered by the external finance
/// system ("chop"). Kept distinct from direct payments so deduction history
/// can be exported on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionRecord {
    pub idempotency_token: String,
    pub obligation_id: Uuid,
    pub borrower_id: Uuid,
    pub amount: Amount,
    pub balance_before: Balance,
    pub balance_after: Balance,
    pub triggering_external_payment_amount: Amount,
    pub period_tag: String,
    pub created_at: DateTime<Utc>,
}

/// Fire-and-forget event sent to the notification collaborator after each
/// successful reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub borrower_id: Uuid,
    pub obligation_id: Uuid,
    pub amount_applied: Amount,
    pub new_balance: Balance,
}

/// Immutable entries handed to the audit-log collaborator. Appended for
/// every status transition and every settled payment or deduction; never
/// mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    StatusChanged {
        obligation_id: Uuid,
        from: ObligationStatus,
        to: ObligationStatus,
        at: DateTime<Utc>,
    },
    PaymentSettled {
        token: String,
        obligation_id: Uuid,
        amount: Amount,
        outcome: PaymentOutcome,
        source: PaymentSource,
        at: DateTime<Utc>,
    },
    DeductionApplied {
        token: String,
        obligation_id: Uuid,
        borrower_id: Uuid,
        amount: Amount,
        balance_after: Balance,
        at: DateTime<Utc>,
    },
}
