use crate::domain::money::Amount;
use crate::domain::obligation::{Obligation, ObligationKind, ObligationStatus, has_overdue};
use crate::domain::payment::AuditEvent;
use crate::domain::ports::{AuditSinkRef, ObligationStoreRef};
use crate::error::{LedgerError, Result};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

/// Obligation intake: the boundary the application-intake collaborator
/// calls. Enforces the blocked-borrower gate before creation and drives the
/// approval/rejection transitions.
pub struct ObligationIntake {
    obligations: ObligationStoreRef,
    audit: AuditSinkRef,
}

impl ObligationIntake {
    pub fn new(obligations: ObligationStoreRef, audit: AuditSinkRef) -> Self {
        Self { obligations, audit }
    }

    /// Creates a new obligation in `pending`. Refused while the borrower has
    /// any overdue obligation; the administrative override path lives
    /// outside this engine.
    pub async fn open(
        &self,
        borrower_id: Uuid,
        kind: ObligationKind,
        principal: Amount,
        grace_deadline: NaiveDate,
    ) -> Result<Obligation> {
        let existing = self.obligations.list_by_borrower(borrower_id).await?;
        if has_overdue(&existing) {
            return Err(LedgerError::BorrowerBlocked { borrower_id });
        }
        self.obligations
            .create(borrower_id, kind, principal, grace_deadline)
            .await
    }

    /// Authorizer approval. The obligation activates immediately while any
    /// balance remains, which at approval time is the full principal.
    pub async fn approve(&self, id: Uuid) -> Result<Obligation> {
        let approved = self
            .obligations
            .set_status(id, ObligationStatus::Pending, ObligationStatus::Approved)
            .await?;
        self.audit_transition(id, ObligationStatus::Pending, ObligationStatus::Approved)
            .await;

        if !approved.has_outstanding() {
            return Ok(approved);
        }
        match self
            .obligations
            .set_status(id, ObligationStatus::Approved, ObligationStatus::Active)
            .await
        {
            Ok(active) => {
                self.audit_transition(id, ObligationStatus::Approved, ObligationStatus::Active)
                    .await;
                Ok(active)
            }
            // A payment landed between the two steps and advanced the
            // status already; return the obligation as stored.
            Err(LedgerError::InvalidTransition { .. }) => self
                .obligations
                .get(id)
                .await?
                .ok_or(LedgerError::ObligationNotFound(id)),
            Err(e) => Err(e),
        }
    }

    pub async fn reject(&self, id: Uuid, reason: &str) -> Result<Obligation> {
        let rejected = self.obligations.reject(id, reason.to_string()).await?;
        self.audit_transition(id, ObligationStatus::Pending, ObligationStatus::Rejected)
            .await;
        Ok(rejected)
    }

    async fn audit_transition(&self, id: Uuid, from: ObligationStatus, to: ObligationStatus) {
        let event = AuditEvent::StatusChanged {
            obligation_id: id,
            from,
            to,
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
    use crate::domain::ports::ObligationStore;
    use crate::infrastructure::in_memory::{InMemoryObligationStore, RecordingAudit};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn deadline() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()
    }

    fn harness() -> (Arc<InMemoryObligationStore>, ObligationIntake) {
        let store = Arc::new(InMemoryObligationStore::new());
        let intake = ObligationIntake::new(store.clone(), Arc::new(RecordingAudit::new()));
        (store, intake)
    }

    #[tokio::test]
    async fn open_then_approve_activates() {
        let (store, intake) = harness();
        let o = intake
            .open(
                Uuid::new_v4(),
                ObligationKind::Loan,
                Amount::new(dec!(500)).unwrap(),
                deadline(),
            )
            .await
            .unwrap();
        assert_eq!(o.status, ObligationStatus::Pending);

        let approved = intake.approve(o.id).await.unwrap();
        assert_eq!(approved.status, ObligationStatus::Active);
        assert!(store.get(o.id).await.unwrap().unwrap().approved_at.is_some());
    }

    #[tokio::test]
    async fn reject_records_reason() {
        let (store, intake) = harness();
        let o = intake
            .open(
                Uuid::new_v4(),
                ObligationKind::SupportGrant,
                Amount::new(dec!(500)).unwrap(),
                deadline(),
            )
            .await
            .unwrap();

        let rejected = intake.reject(o.id, "incomplete documents").await.unwrap();
        assert_eq!(rejected.status, ObligationStatus::Rejected);
        assert_eq!(
            rejected.rejected_reason.as_deref(),
            Some("incomplete documents")
        );

        // Terminal: cannot approve afterwards.
        assert!(intake.approve(o.id).await.is_err());
        let _ = store;
    }

    /// Store where a payment beats approval's activation step: by the time
    /// approval tries `approved -> active`, the obligation is repaid.
    struct PaidUnderneath {
        inner: Arc<InMemoryObligationStore>,
    }

    #[async_trait]
    impl ObligationStore for PaidUnderneath {
        async fn create(
            &self,
            borrower_id: Uuid,
            kind: ObligationKind,
            principal: Amount,
            grace_deadline: NaiveDate,
        ) -> Result<Obligation> {
            self.inner.create(borrower_id, kind, principal, grace_deadline).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Obligation>> {
            self.inner.get(id).await
        }

        async fn set_status(
            &self,
            id: Uuid,
            from: ObligationStatus,
            to: ObligationStatus,
        ) -> Result<Obligation> {
            if from == ObligationStatus::Approved && to == ObligationStatus::Active {
                let current = self
                    .inner
                    .get(id)
                    .await?
                    .ok_or(LedgerError::ObligationNotFound(id))?;
                let full = Amount::new(current.outstanding_balance.0)?;
                self.inner.adjust_balance(id, full, current.version).await?;
                self.inner
                    .set_status(id, ObligationStatus::Approved, ObligationStatus::Paid)
                    .await?;
            }
            self.inner.set_status(id, from, to).await
        }

        async fn reject(&self, id: Uuid, reason: String) -> Result<Obligation> {
            self.inner.reject(id, reason).await
        }

        async fn adjust_balance(
            &self,
            id: Uuid,
            reduction: Amount,
            expected_version: u64,
        ) -> Result<Obligation> {
            self.inner.adjust_balance(id, reduction, expected_version).await
        }

        async fn list_by_borrower(&self, borrower_id: Uuid) -> Result<Vec<Obligation>> {
            self.inner.list_by_borrower(borrower_id).await
        }

        async fn list_active(&self) -> Result<Vec<Obligation>> {
            self.inner.list_active().await
        }

        async fn list_all(&self) -> Result<Vec<Obligation>> {
            self.inner.list_all().await
        }
    }

    #[tokio::test]
    async fn approve_tolerates_payment_racing_the_activation_step() {
        let inner = Arc::new(InMemoryObligationStore::new());
        let intake = ObligationIntake::new(
            Arc::new(PaidUnderneath {
                inner: inner.clone(),
            }),
            Arc::new(RecordingAudit::new()),
        );

        let o = intake
            .open(
                Uuid::new_v4(),
                ObligationKind::Loan,
                Amount::new(dec!(100)).unwrap(),
                deadline(),
            )
            .await
            .unwrap();

        // The obligation is healthy (repaid), so approval still succeeds.
        let approved = intake.approve(o.id).await.unwrap();
        assert_eq!(approved.status, ObligationStatus::Paid);
        assert!(approved.outstanding_balance.is_zero());
    }

    #[tokio::test]
    async fn overdue_borrower_cannot_open() {
        let (store, intake) = harness();
        let borrower = Uuid::new_v4();
        let o = intake
            .open(borrower, ObligationKind::Loan, Amount::new(dec!(100)).unwrap(), deadline())
            .await
            .unwrap();
        intake.approve(o.id).await.unwrap();
        store
            .set_status(o.id, ObligationStatus::Active, ObligationStatus::Overdue)
            .await
            .unwrap();

        let err = intake
            .open(borrower, ObligationKind::Loan, Amount::new(dec!(50)).unwrap(), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BorrowerBlocked { .. }));

        // A different borrower is unaffected.
        assert!(
            intake
                .open(Uuid::new_v4(), ObligationKind::Loan, Amount::new(dec!(50)).unwrap(), deadline())
                .await
                .is_ok()
        );
    }
}
