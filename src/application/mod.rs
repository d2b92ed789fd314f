//! Application layer: the reconciliation engine, the deduction processor,
//! intake, and the overdue policy. Everything here is written against the
//! ports in `domain::ports` so storage backends stay swappable.

pub mod deduction;
pub mod intake;
pub mod reconciliation;
pub mod sweep;
