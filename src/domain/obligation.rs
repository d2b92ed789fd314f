use super::money::{Amount, Balance};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator for the two borrowing instruments the platform issues.
/// Loans and support grants share all ledger behaviour; the kind only
/// matters to reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Loan,
    SupportGrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Overdue,
    Paid,
}

impl ObligationStatus {
    /// `rejected` and `paid` never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObligationStatus::Rejected | ObligationStatus::Paid)
    }

    /// The obligation lifecycle state machine. Any status with a drained
    /// balance may move to `paid`; overdue obligations reactivate only by
    /// being repaid in full.
    pub fn can_transition(from: ObligationStatus, to: ObligationStatus) -> bool {
        use ObligationStatus::*;
        match (from, to) {
            (Pending, Approved) | (Pending, Rejected) => true,
            // A payment landing before formal approval still activates.
            (Pending, Active) | (Approved, Active) => true,
            (Active, Overdue) => true,
            (Pending, Paid) | (Approved, Paid) | (Active, Paid) | (Overdue, Paid) => true,
            _ => false,
        }
    }
}

/// A single loan or support-grant instance owed by a borrower.
///
/// `outstanding_balance` is a cached projection of the payment ledger:
/// `principal - sum(successful applied amounts)` at all times. `version` is
/// the optimistic-concurrency guard bumped by the store on every mutation;
/// `seq` is the store-assigned creation ordinal that fixes oldest-first
/// repayment ordering even when timestamps collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub kind: ObligationKind,
    pub principal: Amount,
    pub outstanding_balance: Balance,
    pub status: ObligationStatus,
    pub version: u64,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub grace_deadline: NaiveDate,
}

impl Obligation {
    pub fn has_outstanding(&self) -> bool {
        !self.outstanding_balance.is_zero()
    }

    /// Whether the sweep should mark this obligation overdue as of `as_of`.
    pub fn is_past_grace(&self, as_of: NaiveDate) -> bool {
        self.grace_deadline < as_of
    }
}

/// A borrower with any overdue obligation is barred from opening new ones,
/// regardless of how many others are fully repaid.
pub fn has_overdue(obligations: &[Obligation]) -> bool {
    obligations
        .iter()
        .any(|o| o.status == ObligationStatus::Overdue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use ObligationStatus::*;
        assert!(ObligationStatus::can_transition(Pending, Approved));
        assert!(ObligationStatus::can_transition(Pending, Rejected));
        assert!(ObligationStatus::can_transition(Approved, Active));
        assert!(ObligationStatus::can_transition(Active, Overdue));
        assert!(ObligationStatus::can_transition(Overdue, Paid));
        assert!(ObligationStatus::can_transition(Active, Paid));

        assert!(!ObligationStatus::can_transition(Rejected, Active));
        assert!(!ObligationStatus::can_transition(Paid, Active));
        assert!(!ObligationStatus::can_transition(Overdue, Active));
        assert!(!ObligationStatus::can_transition(Approved, Overdue));
        assert!(ObligationStatus::can_transition(Pending, Active));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ObligationStatus::Rejected.is_terminal());
        assert!(ObligationStatus::Paid.is_terminal());
        assert!(!ObligationStatus::Overdue.is_terminal());
        assert!(!ObligationStatus::Active.is_terminal());
    }

    #[test]
    fn overdue_blocks_regardless_of_other_statuses() {
        use rust_decimal_macros::dec;
        let borrower = Uuid::new_v4();
        let mk = |status, seq| Obligation {
            id: Uuid::new_v4(),
            borrower_id: borrower,
            kind: ObligationKind::Loan,
            principal: Amount::new(dec!(100)).unwrap(),
            outstanding_balance: Balance::new(dec!(0)),
            status,
            version: 1,
            seq,
            created_at: Utc::now(),
            approved_at: None,
            rejected_reason: None,
            grace_deadline: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        };

        let paid_only = vec![mk(ObligationStatus::Paid, 1)];
        assert!(!has_overdue(&paid_only));

        let one_overdue = vec![mk(ObligationStatus::Paid, 1), mk(ObligationStatus::Overdue, 2)];
        assert!(has_overdue(&one_overdue));
    }
}
