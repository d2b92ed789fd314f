use crate::domain::money::Amount;
use crate::domain::obligation::{Obligation, ObligationKind, ObligationStatus};
use crate::domain::payment::{
    AttemptRecord, DeductionRecord, PaymentOutcome, PaymentRecord, PaymentSource,
};
use crate::domain::ports::{ObligationStore, PaymentLedger};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column family for obligation rows.
pub const CF_OBLIGATIONS: &str = "obligations";
/// Column family for payment records, keyed by idempotency token.
pub const CF_PAYMENTS: &str = "payments";
/// Column family for deduction lineage entries.
pub const CF_DEDUCTIONS: &str = "deductions";

/// Persistent store backed by RocksDB, JSON values per column family.
///
/// RocksDB has no compare-and-swap, so the optimistic contracts
/// (`adjust_balance` version guard, insert-or-fetch on tokens) are made
/// atomic by a process-wide write gate. Reads stay lock-free. This matches
/// the engine's single-process deployment; it is not a cross-process lock.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
    next_seq: Arc<AtomicU64>,
}

impl RocksDbStore {
    /// Opens or creates the database, ensuring all column families exist and
    /// recovering the creation-ordinal counter from existing rows.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_OBLIGATIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_DEDUCTIONS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs).map_err(storage_err)?;
        let db = Arc::new(db);

        let mut max_seq = 0;
        {
            let cf = db
                .cf_handle(CF_OBLIGATIONS)
                .ok_or_else(|| LedgerError::Storage("obligations column family missing".into()))?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (_, value) = item.map_err(storage_err)?;
                let obligation: Obligation = serde_json::from_slice(&value).map_err(storage_err)?;
                max_seq = max_seq.max(obligation.seq);
            }
        }

        Ok(Self {
            db,
            write_gate: Arc::new(Mutex::new(())),
            next_seq: Arc::new(AtomicU64::new(max_seq)),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("column family {name} missing")))
    }

    fn read_obligation(&self, id: Uuid) -> Result<Option<Obligation>> {
        let cf = self.cf(CF_OBLIGATIONS)?;
        match self.db.get_cf(cf, id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    fn put_obligation(&self, obligation: &Obligation) -> Result<()> {
        let cf = self.cf(CF_OBLIGATIONS)?;
        let value = serde_json::to_vec(obligation).map_err(storage_err)?;
        self.db
            .put_cf(cf, obligation.id.as_bytes(), value)
            .map_err(storage_err)
    }

    fn scan_obligations(&self) -> Result<Vec<Obligation>> {
        let cf = self.cf(CF_OBLIGATIONS)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            rows.push(serde_json::from_slice(&value).map_err(storage_err)?);
        }
        rows.sort_by_key(|o: &Obligation| o.seq);
        Ok(rows)
    }

    fn read_payment(&self, token: &str) -> Result<Option<PaymentRecord>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, token.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    fn put_payment(&self, record: &PaymentRecord) -> Result<()> {
        let cf = self.cf(CF_PAYMENTS)?;
        let value = serde_json::to_vec(record).map_err(storage_err)?;
        self.db
            .put_cf(cf, record.idempotency_token.as_bytes(), value)
            .map_err(storage_err)
    }
}

fn storage_err(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

#[async_trait]
impl ObligationStore for RocksDbStore {
    async fn create(
        &self,
        borrower_id: Uuid,
        kind: ObligationKind,
        principal: Amount,
        grace_deadline: NaiveDate,
    ) -> Result<Obligation> {
        let _gate = self.write_gate.lock().await;
        let obligation = Obligation {
            id: Uuid::new_v4(),
            borrower_id,
            kind,
            principal,
            outstanding_balance: principal.into(),
            status: ObligationStatus::Pending,
            version: 1,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
            created_at: Utc::now(),
            approved_at: None,
            rejected_reason: None,
            grace_deadline,
        };
        self.put_obligation(&obligation)?;
        Ok(obligation)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Obligation>> {
        self.read_obligation(id)
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: ObligationStatus,
        to: ObligationStatus,
    ) -> Result<Obligation> {
        let _gate = self.write_gate.lock().await;
        let mut obligation = self
            .read_obligation(id)?
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if obligation.status != from || !ObligationStatus::can_transition(from, to) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: obligation.status,
                to,
            });
        }
        obligation.status = to;
        obligation.version += 1;
        if to == ObligationStatus::Approved {
            obligation.approved_at = Some(Utc::now());
        }
        self.put_obligation(&obligation)?;
        Ok(obligation)
    }

    async fn reject(&self, id: Uuid, reason: String) -> Result<Obligation> {
        let _gate = self.write_gate.lock().await;
        let mut obligation = self
            .read_obligation(id)?
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if obligation.status != ObligationStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id,
                from: obligation.status,
                to: ObligationStatus::Rejected,
            });
        }
        obligation.status = ObligationStatus::Rejected;
        obligation.rejected_reason = Some(reason);
        obligation.version += 1;
        self.put_obligation(&obligation)?;
        Ok(obligation)
    }

    async fn adjust_balance(
        &self,
        id: Uuid,
        reduction: Amount,
        expected_version: u64,
    ) -> Result<Obligation> {
        let _gate = self.write_gate.lock().await;
        let mut obligation = self
            .read_obligation(id)?
            .ok_or(LedgerError::ObligationNotFound(id))?;
        if obligation.version != expected_version {
            return Err(LedgerError::ConcurrentModification {
                id,
                expected: expected_version,
                found: obligation.version,
            });
        }
        obligation.outstanding_balance = obligation.outstanding_balance.saturating_sub(reduction);
        obligation.version += 1;
        self.put_obligation(&obligation)?;
        Ok(obligation)
    }

    async fn list_by_borrower(&self, borrower_id: Uuid) -> Result<Vec<Obligation>> {
        Ok(self
            .scan_obligations()?
            .into_iter()
            .filter(|o| o.borrower_id == borrower_id)
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Obligation>> {
        Ok(self
            .scan_obligations()?
            .into_iter()
            .filter(|o| o.status == ObligationStatus::Active)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Obligation>> {
        self.scan_obligations()
    }
}

#[async_trait]
impl PaymentLedger for RocksDbStore {
    async fn record_attempt(
        &self,
        token: &str,
        obligation_id: Uuid,
        amount: Amount,
        source: PaymentSource,
    ) -> Result<AttemptRecord> {
        let _gate = self.write_gate.lock().await;
        if let Some(existing) = self.read_payment(token)? {
            return Ok(AttemptRecord::Existing(existing));
        }
        let record = PaymentRecord::attempt(token, obligation_id, amount, source);
        self.put_payment(&record)?;
        Ok(AttemptRecord::Fresh(record))
    }

    async fn settle(&self, token: &str, outcome: PaymentOutcome) -> Result<PaymentRecord> {
        let _gate = self.write_gate.lock().await;
        let mut record = self
            .read_payment(token)?
            .ok_or_else(|| LedgerError::PaymentNotFound(token.to_string()))?;
        if record.outcome.is_terminal() {
            if record.outcome == outcome {
                return Ok(record);
            }
            return Err(LedgerError::AlreadySettled {
                token: token.to_string(),
                existing: record.outcome,
                requested: outcome,
            });
        }
        record.outcome = outcome;
        record.settled_at = Some(Utc::now());
        self.put_payment(&record)?;
        Ok(record)
    }

    async fn get(&self, token: &str) -> Result<Option<PaymentRecord>> {
        self.read_payment(token)
    }

    async fn payments_for_obligation(&self, obligation_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            let record: PaymentRecord = serde_json::from_slice(&value).map_err(storage_err)?;
            if record.obligation_id == obligation_id {
                records.push(record);
            }
        }
        records.sort_by_key(|p| p.created_at);
        Ok(records)
    }

    async fn record_deduction(&self, record: DeductionRecord) -> Result<()> {
        let cf = self.cf(CF_DEDUCTIONS)?;
        // Token plus obligation id is unique per deduction step.
        let key = format!("{}:{}", record.idempotency_token, record.obligation_id);
        let value = serde_json::to_vec(&record).map_err(storage_err)?;
        self.db.put_cf(cf, key.as_bytes(), value).map_err(storage_err)
    }

    async fn deductions_for_borrower(&self, borrower_id: Uuid) -> Result<Vec<DeductionRecord>> {
        let cf = self.cf(CF_DEDUCTIONS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            let record: DeductionRecord = serde_json::from_slice(&value).map_err(storage_err)?;
            if record.borrower_id == borrower_id {
                records.push(record);
            }
        }
        records.sort_by_key(|d| d.created_at);
        Ok(records)
    }
}
