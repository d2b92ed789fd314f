//! Obligation ledger and automated deduction engine for a student-aid
//! platform: tracks what each borrower owes, applies payments and
//! finance-system deductions exactly once per idempotency token, derives
//! lifecycle status from the balance, and batch-marks overdue accounts.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
