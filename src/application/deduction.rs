use super::reconciliation::{ReconciliationEngine, ReconciliationOutcome};
use crate::domain::money::{Amount, Balance};
use crate::domain::obligation::{Obligation, has_overdue};
use crate::domain::payment::{AuditEvent, DeductionRecord, PaymentSource};
use crate::domain::ports::{AuditSinkRef, ObligationStoreRef, PaymentLedgerRef};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// One obligation's share of a processed deduction.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDeduction {
    pub obligation_id: Uuid,
    pub amount: Balance,
    pub balance_before: Balance,
    pub balance_after: Balance,
}

/// Result of a chop run: how the external payment was spread across the
/// borrower's obligations, what was left over (discarded, reported back),
/// and the borrower's aggregate balance afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeductionResult {
    pub applied: Vec<AppliedDeduction>,
    pub unapplied: Balance,
    pub aggregate_balance: Balance,
}

/// Applies deductions reported by the external school finance system when a
/// borrower receives a disbursement through another channel. Trusts the
/// caller's amount and reference; each obligation's deduction is one atomic
/// reconciliation step, never a cross-obligation transaction.
pub struct DeductionProcessor {
    obligations: ObligationStoreRef,
    ledger: PaymentLedgerRef,
    engine: Arc<ReconciliationEngine>,
    audit: AuditSinkRef,
}

impl DeductionProcessor {
    pub fn new(
        obligations: ObligationStoreRef,
        ledger: PaymentLedgerRef,
        engine: Arc<ReconciliationEngine>,
        audit: AuditSinkRef,
    ) -> Self {
        Self {
            obligations,
            ledger,
            engine,
            audit,
        }
    }

    /// FIFO repayment: the earliest-created obligation with outstanding
    /// balance is repaid first, by policy, until the external amount is
    /// exhausted. A crash mid-loop leaves completed steps durable; the
    /// caller re-invokes with the recomputed remaining amount.
    pub async fn process_deduction(
        &self,
        borrower_id: Uuid,
        external_amount: Amount,
        reference: Option<&str>,
        period_tag: &str,
    ) -> Result<DeductionResult> {
        let outstanding: Vec<Obligation> = self
            .obligations
            .list_by_borrower(borrower_id)
            .await?
            .into_iter()
            .filter(|o| !o.status.is_terminal() && o.has_outstanding())
            .collect();

        if outstanding.is_empty() {
            // Benign no-op for the caller, distinct from a processing failure.
            return Err(LedgerError::NoOutstandingObligations { borrower_id });
        }

        // Without a caller reference each invocation is a distinct event;
        // with one, re-delivery of the same callback is fully idempotent.
        let reference = reference
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut remaining = external_amount.value();
        let mut applied = Vec::new();

        for obligation in outstanding {
            if remaining <= Decimal::ZERO {
                break;
            }
            let portion = remaining.min(obligation.outstanding_balance.0);
            let portion = Amount::new(portion)?;
            let token = deduction_token(&reference, obligation.id);

            match self
                .engine
                .apply_payment(&token, obligation.id, portion, PaymentSource::FinanceSystemDeduction)
                .await?
            {
                ReconciliationOutcome::Applied {
                    amount_applied,
                    new_balance,
                } => {
                    let record = DeductionRecord {
                        idempotency_token: token.clone(),
                        obligation_id: obligation.id,
                        borrower_id,
                        amount: portion,
                        balance_before: obligation.outstanding_balance,
                        balance_after: new_balance,
                        triggering_external_payment_amount: external_amount,
                        period_tag: period_tag.to_string(),
                        created_at: Utc::now(),
                    };
                    self.ledger.record_deduction(record).await?;
                    if let Err(e) = self
                        .audit
                        .append(AuditEvent::DeductionApplied {
                            token,
                            obligation_id: obligation.id,
                            borrower_id,
                            amount: portion,
                            balance_after: new_balance,
                            at: Utc::now(),
                        })
                        .await
                    {
                        tracing::warn!(error = %e, "audit append failed for deduction");
                    }
                    remaining -= amount_applied.0;
                    applied.push(AppliedDeduction {
                        obligation_id: obligation.id,
                        amount: amount_applied,
                        balance_before: obligation.outstanding_balance,
                        balance_after: new_balance,
                    });
                }
                ReconciliationOutcome::AlreadyApplied => {
                    // Duplicate finance-system callback for this reference.
                    // Count the original application against the remaining
                    // amount so the replay cannot spill over onto later
                    // obligations.
                    if let Some(prior) = self.ledger.get(&token).await? {
                        remaining -= prior.amount.value();
                    }
                    tracing::info!(%borrower_id, obligation = %obligation.id, "duplicate deduction absorbed");
                }
                ReconciliationOutcome::Failed => {
                    tracing::warn!(
                        %borrower_id,
                        obligation = %obligation.id,
                        "deduction token previously settled failed, skipping obligation"
                    );
                }
            }
        }

        let aggregate_balance = self
            .obligations
            .list_by_borrower(borrower_id)
            .await?
            .iter()
            .filter(|o| !o.status.is_terminal())
            .fold(Balance::ZERO, |acc, o| acc + o.outstanding_balance);

        Ok(DeductionResult {
            applied,
            unapplied: Balance::new(remaining.max(Decimal::ZERO)),
            aggregate_balance,
        })
    }

    /// Eligibility gate consulted before any new obligation is created:
    /// blocked while any of the borrower's obligations is overdue.
    pub async fn is_blocked_from_new_loans(&self, borrower_id: Uuid) -> Result<bool> {
        let obligations = self.obligations.list_by_borrower(borrower_id).await?;
        Ok(has_overdue(&obligations))
    }
}

fn deduction_token(reference: &str, obligation_id: Uuid) -> String {
    format!("chop:{reference}:{obligation_id}")
}
