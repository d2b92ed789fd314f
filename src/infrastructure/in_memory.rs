use crate::domain::money::Amount;
use crate::domain::obligation::{Obligation, ObligationKind, ObligationStatus};
use crate::domain::payment::{
    AttemptRecord, AuditEvent, DeductionRecord, PaymentNotice, PaymentOutcome, PaymentRecord,
    PaymentSource,
};
use crate::domain::ports::{AuditSink, NotificationSink, ObligationStore, PaymentLedger};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct ObligationTable {
    rows: HashMap<Uuid, Obligation>,
    next_seq: u64,
}

/// Thread-safe in-memory obligation store.
///
/// Every mutation happens under a single write guard, which is what makes
/// the optimistic `set_status` / `adjust_balance` contracts atomic here.
#[derive(Default, Clone)]
pub struct InMemoryObligationStore {
    table: Arc<RwLock<ObligationTable>>,
}

impl InMemoryObligationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObligationStore for InMemoryObligationStore {
    async fn create(
        &self,
        borrower_id: Uuid,
        kind: ObligationKind,
        principal: Amount,
        grace_deadline: NaiveDate,
    ) -> Result<Obligation> {
        let mut table = self.table.write().await;
        table.next_seq += 1;
        let obligation = Obligation {
            id: Uuid::new_v4(),
            borrower_id,
            kind,
            principal,
            outstanding_balance: principal.into(),
            status: ObligationStatus::Pending,
            version: 1,
            seq: table.next_seq,
            created_at: Utc::now(),
            approved_at: None,
            rejected_reason: None,
            grace_deadline,
        };
        table.rows.insert(obligation.id, obligation.clone());
        Ok(obligation)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Obligation>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: ObligationStatus,
        to: ObligationStatus,
    ) -> Result<Obligation> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&id)
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if row.status != from || !ObligationStatus::can_transition(from, to) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: row.status,
                to,
            });
        }
        row.status = to;
        row.version += 1;
        if to == ObligationStatus::Approved {
            row.approved_at = Some(Utc::now());
        }
        Ok(row.clone())
    }

    async fn reject(&self, id: Uuid, reason: String) -> Result<Obligation> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&id)
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if row.status != ObligationStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id,
                from: row.status,
                to: ObligationStatus::Rejected,
            });
        }
        row.status = ObligationStatus::Rejected;
        row.rejected_reason = Some(reason);
        row.version += 1;
        Ok(row.clone())
    }

    async fn adjust_balance(
        &self,
        id: Uuid,
        reduction: Amount,
        expected_version: u64,
    ) -> Result<Obligation> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&id)
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if row.version != expected_version {
            return Err(LedgerError::ConcurrentModification {
                id,
                expected: expected_version,
                found: row.version,
            });
        }
        row.outstanding_balance = row.outstanding_balance.saturating_sub(reduction);
        row.version += 1;
        Ok(row.clone())
    }

    async fn list_by_borrower(&self, borrower_id: Uuid) -> Result<Vec<Obligation>> {
        let table = self.table.read().await;
        let mut rows: Vec<Obligation> = table
            .rows
            .values()
            .filter(|o| o.borrower_id == borrower_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.seq);
        Ok(rows)
    }

    async fn list_active(&self) -> Result<Vec<Obligation>> {
        let table = self.table.read().await;
        let mut rows: Vec<Obligation> = table
            .rows
            .values()
            .filter(|o| o.status == ObligationStatus::Active)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.seq);
        Ok(rows)
    }

    async fn list_all(&self) -> Result<Vec<Obligation>> {
        let table = self.table.read().await;
        let mut rows: Vec<Obligation> = table.rows.values().cloned().collect();
        rows.sort_by_key(|o| o.seq);
        Ok(rows)
    }
}

/// Thread-safe in-memory payment ledger.
///
/// The insert-or-fetch on the idempotency token runs under the write guard,
/// never as a check-then-insert across lock boundaries.
#[derive(Default, Clone)]
pub struct InMemoryPaymentLedger {
    payments: Arc<RwLock<HashMap<String, PaymentRecord>>>,
    deductions: Arc<RwLock<Vec<DeductionRecord>>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn record_attempt(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
        source: PaymentSource,
    ) -> Result<AttemptRecord> {
        let mut payments = self.payments.write().await;
        if let Some(existing) = payments.get(token) {
            return Ok(AttemptRecord::Existing(existing.clone()));
        }
        let record = PaymentRecord::attempt(token, obligation_id, amount, source);
        payments.insert(token.to_string(), record.clone());
        Ok(AttemptRecord::Fresh(record))
    }

    async fn settle(&self, token: &str, outcome: PaymentOutcome) -> Result<PaymentRecord> {
        let mut payments = self.payments.write().await;
        let record = payments
            .get_mut(token)
            .ok_or_else(|| LedgerError::PaymentNotFound(token.to_string()))?;
        if record.outcome.is_terminal() {
            if record.outcome == outcome {
                // Retried callback settling to the same outcome: no-op.
                return Ok(record.clone());
            }
            return Err(LedgerError::AlreadySettled {
                token: token.to_string(),
                existing: record.outcome,
                requested: outcome,
            });
        }
        record.outcome = outcome;
        record.settled_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get(&self, token: &str) -> Result<Option<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments.get(token).cloned())
    }

    async fn payments_for_obligation(&self, obligation_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        let mut records: Vec<PaymentRecord> = payments
            .values()
            .filter(|p| p.obligation_id == obligation_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.created_at);
        Ok(records)
    }

    async fn record_deduction(&self, record: DeductionRecord) -> Result<()> {
        let mut deductions = self.deductions.write().await;
        deductions.push(record);
        Ok(())
    }

    async fn deductions_for_borrower(&self, borrower_id: Uuid) -> Result<Vec<DeductionRecord>> {
        let deductions = self.deductions.read().await;
        Ok(deductions
            .iter()
            .filter(|d| d.borrower_id == borrower_id)
            .cloned()
            .collect())
    }
}

/// Records notices for inspection; doubles as the notification collaborator
/// in tests and the CLI replay.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<RwLock<Vec<PaymentNotice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<PaymentNotice> {
        self.notices.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notice: PaymentNotice) -> Result<()> {
        self.notices.write().await.push(notice);
        Ok(())
    }
}

/// Notification sink that always fails. Used to prove that notification
/// failure never rolls back a financial mutation.
#[derive(Default, Clone)]
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify(&self, _notice: PaymentNotice) -> Result<()> {
        Err(LedgerError::Storage("notification channel down".into()))
    }
}

/// Append-only audit trail held in memory.
#[derive(Default, Clone)]
pub struct RecordingAudit {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Emits each notice as a structured log line. The binary wires this in
/// where a real deployment would call the notification service.
#[derive(Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, notice: PaymentNotice) -> Result<()> {
        tracing::info!(
            borrower = %notice.borrower_id,
            obligation = %notice.obligation_id,
            amount = %notice.amount_applied,
            new_balance = %notice.new_balance,
            "payment applied"
        );
        Ok(())
    }
}

/// Emits audit entries as structured log lines.
#[derive(Default, Clone)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", entry = %json),
            Err(e) => tracing::warn!(target: "audit", error = %e, "unserializable audit event"),
        }
        Ok(())
    }
}
