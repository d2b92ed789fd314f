use crate::domain::money::{Amount, Balance};
use crate::domain::obligation::{Obligation, ObligationStatus};
use crate::domain::payment::{
    AttemptRecord, AuditEvent, PaymentNotice, PaymentOutcome, PaymentRecord, PaymentSource,
};
use crate::domain::ports::{
    AuditSinkRef, NotificationSinkRef, ObligationStoreRef, PaymentLedgerRef,
};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use uuid::Uuid;

/// How many times a balance CAS may be retried before the attempt is left
/// `pending` for manual reconciliation. Contention on a single obligation is
/// rare (simultaneous local confirmation and provider callback), so a small
/// fixed budget is enough; unbounded spin risks livelock.
const BALANCE_RETRY_BUDGET: usize = 4;

/// Coarse outcome reported to collaborators. Internal retry counts never
/// leak out; a conflict that exhausts the retry budget surfaces as
/// `LedgerError::ReconciliationConflict` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// The payment mutated the balance. `amount_applied` can be smaller than
    /// the payment (overpayment capped at zero) and is zero when the
    /// obligation was already fully repaid.
    Applied {
        amount_applied: Balance,
        new_balance: Balance,
    },
    /// Duplicate delivery of an already-successful token. No mutation.
    AlreadyApplied,
    /// The token is settled as failed; nothing was or will be applied.
    Failed,
}

/// The only path permitted to reduce an obligation's outstanding balance in
/// response to a payment. Consults the payment ledger for idempotency,
/// mutates the obligation under optimistic concurrency, derives lifecycle
/// status from the new balance, and emits notification and audit side
/// effects post-commit.
pub struct ReconciliationEngine {
    obligations: ObligationStoreRef,
    ledger: PaymentLedgerRef,
    notifier: NotificationSinkRef,
    audit: AuditSinkRef,
}

impl ReconciliationEngine {
    pub fn new(
        obligations: ObligationStoreRef,
        ledger: PaymentLedgerRef,
        notifier: NotificationSinkRef,
        audit: AuditSinkRef,
    ) -> Self {
        Self {
            obligations,
            ledger,
            notifier,
            audit,
        }
    }

    /// Provider-callback entry point. A `successful` outcome flows through
    /// the full reconciliation; a `failed` outcome settles the attempt
    /// without touching any balance.
    pub async fn notify_payment_outcome(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
        outcome: PaymentOutcome,
    ) -> Result<ReconciliationOutcome> {
        match outcome {
            PaymentOutcome::Successful => {
                self.apply_payment(token, obligation_id, amount, PaymentSource::ProviderCallback)
                    .await
            }
            PaymentOutcome::Failed => {
                match self
                    .ledger
                    .record_attempt(token, obligation_id, amount, PaymentSource::ProviderCallback)
                    .await?
                {
                    AttemptRecord::Fresh(_) => {}
                    AttemptRecord::Existing(record) => match record.outcome {
                        // The provider now claims failure for money we
                        // already applied. Surfaced, never silently
                        // overwritten.
                        PaymentOutcome::Successful => {
                            return Err(LedgerError::AlreadySettled {
                                token: token.to_string(),
                                existing: record.outcome,
                                requested: PaymentOutcome::Failed,
                            });
                        }
                        PaymentOutcome::Failed => {
                            return Ok(ReconciliationOutcome::Failed);
                        }
                        PaymentOutcome::Pending => {
                            return Err(LedgerError::PaymentInFlight {
                                token: token.to_string(),
                            });
                        }
                    },
                }
                let settled = self.ledger.settle(token, PaymentOutcome::Failed).await?;
                self.audit_settlement(&settled).await;
                Ok(ReconciliationOutcome::Failed)
            }
            PaymentOutcome::Pending => Err(LedgerError::Storage(format!(
                "provider reported non-terminal outcome for token {token}"
            ))),
        }
    }

    /// Local-confirmation entry point (borrower confirmed a payment in the
    /// portal). Same reconciliation path, different source tag.
    pub async fn confirm_payment(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
    ) -> Result<ReconciliationOutcome> {
        self.apply_payment(token, obligation_id, amount, PaymentSource::LocalConfirmation)
            .await
    }

    /// Applies one payment to one obligation, exactly once per token.
    pub async fn apply_payment(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
        source: PaymentSource,
    ) -> Result<ReconciliationOutcome> {
        match self
            .ledger
            .record_attempt(token, obligation_id, amount, source)
            .await?
        {
            // This call owns the fresh pending record; apply it below.
            AttemptRecord::Fresh(_) => {}
            AttemptRecord::Existing(record) => match record.outcome {
                PaymentOutcome::Successful => {
                    // Duplicate delivery. The core at-most-once guarantee:
                    // return success without touching the obligation.
                    tracing::info!(token, %obligation_id, "duplicate payment delivery absorbed");
                    return Ok(ReconciliationOutcome::AlreadyApplied);
                }
                PaymentOutcome::Failed => return Ok(ReconciliationOutcome::Failed),
                PaymentOutcome::Pending => {
                    // A concurrent delivery of this token is mid-application.
                    // Exactly one handler may proceed per token.
                    tracing::info!(token, %obligation_id, "duplicate delivery raced an in-flight application");
                    return Err(LedgerError::PaymentInFlight {
                        token: token.to_string(),
                    });
                }
            },
        }

        for attempt in 1..=BALANCE_RETRY_BUDGET {
            let obligation = self
                .obligations
                .get(obligation_id)
                .await?
                .ok_or(LedgerError::ObligationNotFound(obligation_id))?;

            if obligation.status == ObligationStatus::Rejected {
                // Money against a never-disbursed obligation is refused; the
                // attempt settles failed so redeliveries stay refused.
                tracing::warn!(token, %obligation_id, "payment against rejected obligation refused");
                let settled = self.ledger.settle(token, PaymentOutcome::Failed).await?;
                self.audit_settlement(&settled).await;
                return Ok(ReconciliationOutcome::Failed);
            }

            let Some(reduction) = obligation.outstanding_balance.applicable(amount) else {
                // Already fully repaid; the payment settles successfully but
                // applies nothing. Excess is discarded, not credited.
                return self
                    .finish(token, &obligation, Balance::ZERO, obligation.outstanding_balance)
                    .await;
            };

            match self
                .obligations
                .adjust_balance(obligation_id, reduction, obligation.version)
                .await
            {
                Ok(updated) => {
                    return self
                        .finish(token, &updated, reduction.into(), updated.outstanding_balance)
                        .await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(token, %obligation_id, attempt, "balance version race, re-reading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            token,
            %obligation_id,
            budget = BALANCE_RETRY_BUDGET,
            "reconciliation retry budget exhausted, payment left pending for manual review"
        );
        Err(LedgerError::ReconciliationConflict {
            token: token.to_string(),
        })
    }

    /// Post-mutation tail: settle the token, derive status, emit side
    /// effects. The financial mutation is already durable at this point;
    /// notification failure is logged and never rolled back.
    async fn finish(
        &self,
        token: &str,
        obligation: &Obligation,
        amount_applied: Balance,
        new_balance: Balance,
    ) -> Result<ReconciliationOutcome> {
        let settled = self.ledger.settle(token, PaymentOutcome::Successful).await?;
        self.audit_settlement(&settled).await;
        self.derive_status(obligation, new_balance).await?;

        let notice = PaymentNotice {
            borrower_id: obligation.borrower_id,
            obligation_id: obligation.id,
            amount_applied: match Amount::new(amount_applied.0) {
                Ok(a) => a,
                // Zero application (overpayment against a drained balance):
                // nothing to announce.
                Err(_) => {
                    return Ok(ReconciliationOutcome::Applied {
                        amount_applied,
                        new_balance,
                    });
                }
            },
            new_balance,
        };
        if let Err(e) = self.notifier.notify(notice).await {
            tracing::warn!(token, error = %e, "payment notification failed (best effort, not rolled back)");
        }

        Ok(ReconciliationOutcome::Applied {
            amount_applied,
            new_balance,
        })
    }

    /// Balance-derived lifecycle: drained balance means `paid`; a first
    /// successful application activates a pending/approved obligation.
    async fn derive_status(&self, obligation: &Obligation, new_balance: Balance) -> Result<()> {
        let target = if new_balance.is_zero() {
            Some(ObligationStatus::Paid)
        } else if matches!(
            obligation.status,
            ObligationStatus::Pending | ObligationStatus::Approved
        ) {
            Some(ObligationStatus::Active)
        } else {
            None
        };

        let Some(to) = target else { return Ok(()) };
        if obligation.status == to {
            return Ok(());
        }
        match self.obligations.set_status(obligation.id, obligation.status, to).await {
            Ok(_) => {
                self.append_audit(AuditEvent::StatusChanged {
                    obligation_id: obligation.id,
                    from: obligation.status,
                    to,
                    at: Utc::now(),
                })
                .await;
                Ok(())
            }
            // A concurrent writer got there first (e.g. another payment
            // already marked it paid). The balance mutation stands.
            Err(LedgerError::InvalidTransition { .. }) => {
                tracing::debug!(obligation = %obligation.id, ?to, "status already advanced by concurrent writer");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn audit_settlement(&self, record: &PaymentRecord) {
        self.append_audit(AuditEvent::PaymentSettled {
            token: record.idempotency_token.clone(),
            obligation_id: record.obligation_id,
            amount: record.amount,
            outcome: record.outcome,
            source: record.source,
            at: record.settled_at.unwrap_or_else(Utc::now),
        })
        .await;
    }

    async fn append_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(event).await {
            tracing::warn!(error = %e, "audit append failed");
        }
    }
}
