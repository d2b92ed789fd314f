use crate::domain::obligation::{Obligation, ObligationStatus};
use crate::domain::payment::AuditEvent;
use crate::domain::ports::{AuditSinkRef, ObligationStoreRef};
use crate::error::{LedgerError, Result};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

/// Outcome of one batch sweep. Failures are recorded per obligation and
/// never abort the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub scanned: usize,
    pub marked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(Uuid, String)>,
}

/// Derives `overdue` from time plus balance, and runs the batch sweep at
/// semester boundaries. Only touches obligation status; the payment ledger
/// is never read or written here.
pub struct OverduePolicy {
    obligations: ObligationStoreRef,
    audit: AuditSinkRef,
}

impl OverduePolicy {
    pub fn new(obligations: ObligationStoreRef, audit: AuditSinkRef) -> Self {
        Self { obligations, audit }
    }

    /// Administrative path: `active -> overdue` only.
    pub async fn mark_overdue(&self, id: Uuid) -> Result<Obligation> {
        let obligation = self
            .obligations
            .get(id)
            .await?
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if !obligation.has_outstanding() {
            return Err(LedgerError::NothingToMark { id });
        }
        if obligation.status != ObligationStatus::Active {
            return Err(LedgerError::InvalidTransition {
                id,
                from: obligation.status,
                to: ObligationStatus::Overdue,
            });
        }
        let updated = self
            .obligations
            .set_status(id, ObligationStatus::Active, ObligationStatus::Overdue)
            .await?;
        self.append_audit(id).await;
        Ok(updated)
    }

    /// Scans all active obligations and marks those with outstanding balance
    /// past their grace deadline as of `as_of`. A payment racing the sweep is
    /// resolved by whichever write wins the version guard; losing here just
    /// means the obligation moved on (usually to `paid`) and counts as
    /// skipped.
    pub async fn sweep(&self, as_of: NaiveDate) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for obligation in self.obligations.list_active().await? {
            report.scanned += 1;

            if !obligation.has_outstanding() || !obligation.is_past_grace(as_of) {
                report.skipped += 1;
                continue;
            }

            match self
                .obligations
                .set_status(obligation.id, ObligationStatus::Active, ObligationStatus::Overdue)
                .await
            {
                Ok(_) => {
                    self.append_audit(obligation.id).await;
                    report.marked += 1;
                }
                Err(LedgerError::InvalidTransition { .. }) => {
                    // Lost the race to a concurrent writer; no longer active.
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(obligation = %obligation.id, error = %e, "sweep failed to mark obligation");
                    report.failures.push((obligation.id, e.to_string()));
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            %as_of,
            scanned = report.scanned,
            marked = report.marked,
            skipped = report.skipped,
            failed = report.failed,
            "overdue sweep complete"
        );
        Ok(report)
    }

    async fn append_audit(&self, id: Uuid) {
        let event = AuditEvent::StatusChanged {
            obligation_id: id,
            from: ObligationStatus::Active,
            to: ObligationStatus::Overdue,
            at: Utc::now(),
        };
        if let Err(e) = self.audit.append(event).await {
            tracing::warn!(error = %e, "audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::obligation::ObligationKind;
    use crate::domain::ports::ObligationStore;
    use crate::infrastructure::in_memory::{InMemoryObligationStore, RecordingAudit};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Harness {
        store: Arc<InMemoryObligationStore>,
        policy: OverduePolicy,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryObligationStore::new());
        let policy = OverduePolicy::new(store.clone(), Arc::new(RecordingAudit::new()));
        Harness { store, policy }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn active(h: &Harness, deadline: NaiveDate) -> Obligation {
        let o = h
            .store
            .create(
                Uuid::new_v4(),
                ObligationKind::Loan,
                Amount::new(dec!(100)).unwrap(),
                deadline,
            )
            .await
            .unwrap();
        h.store
            .set_status(o.id, ObligationStatus::Pending, ObligationStatus::Approved)
            .await
            .unwrap();
        h.store
            .set_status(o.id, ObligationStatus::Approved, ObligationStatus::Active)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn mark_overdue_requires_active() {
        let h = harness();
        let o = h
            .store
            .create(
                Uuid::new_v4(),
                ObligationKind::Loan,
                Amount::new(dec!(100)).unwrap(),
                date(2026, 1, 31),
            )
            .await
            .unwrap();

        let err = h.policy.mark_overdue(o.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn mark_overdue_transitions_active() {
        let h = harness();
        let o = active(&h, date(2026, 1, 31)).await;

        let updated = h.policy.mark_overdue(o.id).await.unwrap();
        assert_eq!(updated.status, ObligationStatus::Overdue);
    }

    #[tokio::test]
    async fn mark_overdue_with_zero_balance_is_nothing_to_mark() {
        let h = harness();
        let o = active(&h, date(2026, 1, 31)).await;
        h.store
            .adjust_balance(o.id, Amount::new(dec!(100)).unwrap(), o.version)
            .await
            .unwrap();

        let err = h.policy.mark_overdue(o.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NothingToMark { .. }));
    }

    #[tokio::test]
    async fn sweep_marks_only_past_deadline() {
        let h = harness();
        let stale = active(&h, date(2026, 1, 31)).await;
        let current = active(&h, date(2026, 9, 30)).await;

        let report = h.policy.sweep(date(2026, 2, 15)).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.marked, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let stale_stored = h.store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale_stored.status, ObligationStatus::Overdue);
        let current_stored = h.store.get(current.id).await.unwrap().unwrap();
        assert_eq!(current_stored.status, ObligationStatus::Active);
    }

    #[tokio::test]
    async fn deadline_day_itself_is_within_grace() {
        let h = harness();
        active(&h, date(2026, 2, 15)).await;

        let report = h.policy.sweep(date(2026, 2, 15)).await.unwrap();
        assert_eq!(report.marked, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let h = harness();
        active(&h, date(2026, 1, 31)).await;
        active(&h, date(2026, 1, 31)).await;

        let first = h.policy.sweep(date(2026, 6, 1)).await.unwrap();
        assert_eq!(first.marked, 2);

        // Overdue obligations are no longer active, so the second run scans
        // and marks nothing further.
        let second = h.policy.sweep(date(2026, 6, 1)).await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.marked, 0);
    }

    #[tokio::test]
    async fn fully_repaid_active_obligation_is_skipped() {
        let h = harness();
        let o = active(&h, date(2026, 1, 31)).await;
        h.store
            .adjust_balance(o.id, Amount::new(dec!(100)).unwrap(), o.version)
            .await
            .unwrap();

        let report = h.policy.sweep(date(2026, 6, 1)).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.marked, 0);
    }
}
