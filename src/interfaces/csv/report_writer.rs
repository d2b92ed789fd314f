use crate::domain::money::{Amount, Balance};
use crate::domain::obligation::{Obligation, ObligationKind, ObligationStatus};
use crate::domain::payment::DeductionRecord;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the obligation summary. `obligation` and `borrower` carry
/// whatever labels the caller addresses them by (CSV replay labels, or raw
/// ids from a reporting collaborator).
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct ObligationRow {
    pub obligation: String,
    pub borrower: String,
    pub kind: ObligationKind,
    pub principal: Amount,
    pub outstanding_balance: Balance,
    pub status: ObligationStatus,
}

impl ObligationRow {
    pub fn new(obligation_label: &str, borrower_label: &str, o: &Obligation) -> Self {
        Self {
            obligation: obligation_label.to_string(),
            borrower: borrower_label.to_string(),
            kind: o.kind,
            principal: o.principal,
            outstanding_balance: o.outstanding_balance,
            status: o.status,
        }
    }
}

/// Flattened deduction-history line for the downloadable export.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct DeductionRow {
    pub token: String,
    pub obligation_id: String,
    pub borrower_id: String,
    pub amount: Amount,
    pub balance_before: Balance,
    pub balance_after: Balance,
    pub external_payment_amount: Amount,
    pub period: String,
}

impl From<&DeductionRecord> for DeductionRow {
    fn from(d: &DeductionRecord) -> Self {
        Self {
            token: d.idempotency_token.clone(),
            obligation_id: d.obligation_id.to_string(),
            borrower_id: d.borrower_id.to_string(),
            amount: d.amount,
            balance_before: d.balance_before,
            balance_after: d.balance_after,
            external_payment_amount: d.triggering_external_payment_amount,
            period: d.period_tag.clone(),
        }
    }
}

/// Writes the tabular exports reporting collaborators hand to users.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(target: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(target),
        }
    }

    pub fn write_obligations(&mut self, rows: impl IntoIterator<Item = ObligationRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_deductions(&mut self, records: &[DeductionRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(DeductionRow::from(record))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
