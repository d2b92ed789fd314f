#![allow(dead_code)]

use chopbook::application::deduction::DeductionProcessor;
use chopbook::application::intake::ObligationIntake;
use chopbook::application::reconciliation::ReconciliationEngine;
use chopbook::application::sweep::OverduePolicy;
use chopbook::domain::money::Amount;
use chopbook::domain::obligation::{Obligation, ObligationKind};
use chopbook::infrastructure::in_memory::{
    InMemoryObligationStore, InMemoryPaymentLedger, RecordingAudit, RecordingNotifier,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Fully wired in-memory stack, shared by the integration suites.
pub struct Stack {
    pub store: Arc<InMemoryObligationStore>,
    pub ledger: Arc<InMemoryPaymentLedger>,
    pub engine: Arc<ReconciliationEngine>,
    pub intake: ObligationIntake,
    pub processor: DeductionProcessor,
    pub policy: OverduePolicy,
    pub notifier: RecordingNotifier,
    pub audit: RecordingAudit,
}

pub fn stack() -> Stack {
    let store = Arc::new(InMemoryObligationStore::new());
    let ledger = Arc::new(InMemoryPaymentLedger::new());
    let notifier = RecordingNotifier::new();
    let audit = RecordingAudit::new();
    let audit_ref: Arc<RecordingAudit> = Arc::new(audit.clone());

    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        ledger.clone(),
        Arc::new(notifier.clone()),
        audit_ref.clone(),
    ));
    let intake = ObligationIntake::new(store.clone(), audit_ref.clone());
    let processor = DeductionProcessor::new(
        store.clone(),
        ledger.clone(),
        engine.clone(),
        audit_ref.clone(),
    );
    let policy = OverduePolicy::new(store.clone(), audit_ref);

    Stack {
        store,
        ledger,
        engine,
        intake,
        processor,
        policy,
        notifier,
        audit,
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).expect("positive test amount")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

/// Opens and approves a loan, leaving it `active` with the full principal
/// outstanding.
pub async fn active_loan(stack: &Stack, borrower: Uuid, principal: Decimal) -> Obligation {
    let o = stack
        .intake
        .open(borrower, ObligationKind::Loan, amount(principal), date(2026, 6, 30))
        .await
        .expect("open");
    stack.intake.approve(o.id).await.expect("approve")
}
