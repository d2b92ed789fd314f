use chopbook::application::deduction::DeductionProcessor;
use chopbook::application::intake::ObligationIntake;
use chopbook::application::reconciliation::ReconciliationEngine;
use chopbook::application::sweep::OverduePolicy;
use chopbook::domain::money::Amount;
use chopbook::domain::obligation::ObligationKind;
use chopbook::domain::payment::DeductionRecord;
use chopbook::domain::ports::{ObligationStoreRef, PaymentLedgerRef};
use chopbook::error::LedgerError;
use chopbook::infrastructure::in_memory::{
    InMemoryObligationStore, InMemoryPaymentLedger, TracingAudit, TracingNotifier,
};
use chopbook::interfaces::csv::event_reader::{EventKind, EventReader, LedgerEvent};
use chopbook::interfaces::csv::report_writer::{ObligationRow, ReportWriter};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Replays a CSV stream of ledger events (intake, payments, deductions,
/// sweeps) through the obligation ledger and prints the resulting
/// obligation summary as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input ledger-event CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Also export the deduction history to this CSV file.
    #[arg(long)]
    deductions: Option<PathBuf>,
}

/// Maps the caller-side labels in the CSV onto store-owned identifiers.
#[derive(Default)]
struct Labels {
    borrowers: HashMap<String, Uuid>,
    obligations: HashMap<String, Uuid>,
}

impl Labels {
    fn borrower(&mut self, label: &str) -> Uuid {
        *self
            .borrowers
            .entry(label.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    fn obligation(&self, label: &str) -> Option<Uuid> {
        self.obligations.get(label).copied()
    }

    /// Inverts a label map once for reporting, instead of scanning per row.
    fn reversed(map: &HashMap<String, Uuid>) -> HashMap<Uuid, String> {
        map.iter().map(|(label, id)| (*id, label.clone())).collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let (obligations, ledger): (ObligationStoreRef, PaymentLedgerRef) = match &cli.db_path {
        Some(path) => {
            #[cfg(feature = "storage-rocksdb")]
            {
                let store = chopbook::infrastructure::rocksdb::RocksDbStore::open(path)
                    .into_diagnostic()?;
                (Arc::new(store.clone()), Arc::new(store))
            }
            #[cfg(not(feature = "storage-rocksdb"))]
            {
                let _ = path;
                return Err(miette::miette!(
                    "--db-path requires building with the storage-rocksdb feature"
                ));
            }
        }
        None => (
            Arc::new(InMemoryObligationStore::new()),
            Arc::new(InMemoryPaymentLedger::new()),
        ),
    };

    let engine = Arc::new(ReconciliationEngine::new(
        obligations.clone(),
        ledger.clone(),
        Arc::new(TracingNotifier),
        Arc::new(TracingAudit),
    ));
    let intake = ObligationIntake::new(obligations.clone(), Arc::new(TracingAudit));
    let processor = DeductionProcessor::new(
        obligations.clone(),
        ledger.clone(),
        engine.clone(),
        Arc::new(TracingAudit),
    );
    let policy = OverduePolicy::new(obligations.clone(), Arc::new(TracingAudit));

    let mut labels = Labels::default();

    let file = File::open(&cli.input).into_diagnostic()?;
    for event in EventReader::new(file).events() {
        match event {
            Ok(event) => {
                if let Err(e) =
                    replay(&event, &mut labels, &intake, &engine, &processor, &policy).await
                {
                    tracing::warn!(error = %e, ?event, "event not applied");
                }
            }
            Err(e) => tracing::warn!(error = %e, "unreadable event row"),
        }
    }

    // Final obligation summary on stdout.
    let obligation_names = Labels::reversed(&labels.obligations);
    let borrower_names = Labels::reversed(&labels.borrowers);
    let mut rows = Vec::new();
    for o in obligations.list_all().await.into_diagnostic()? {
        let obligation_label = obligation_names
            .get(&o.id)
            .cloned()
            .unwrap_or_else(|| o.id.to_string());
        let borrower_label = borrower_names
            .get(&o.borrower_id)
            .cloned()
            .unwrap_or_else(|| o.borrower_id.to_string());
        rows.push(ObligationRow::new(&obligation_label, &borrower_label, &o));
    }
    let stdout = io::stdout();
    ReportWriter::new(stdout.lock())
        .write_obligations(rows)
        .into_diagnostic()?;

    if let Some(path) = &cli.deductions {
        let mut records: Vec<DeductionRecord> = Vec::new();
        for borrower in labels.borrowers.values() {
            records.extend(
                ledger
                    .deductions_for_borrower(*borrower)
                    .await
                    .into_diagnostic()?,
            );
        }
        let out = File::create(path).into_diagnostic()?;
        ReportWriter::new(out)
            .write_deductions(&records)
            .into_diagnostic()?;
    }

    Ok(())
}

fn missing(field: &str) -> LedgerError {
    LedgerError::Storage(format!("event is missing required column `{field}`"))
}

async fn replay(
    event: &LedgerEvent,
    labels: &mut Labels,
    intake: &ObligationIntake,
    engine: &ReconciliationEngine,
    processor: &DeductionProcessor,
    policy: &OverduePolicy,
) -> chopbook::error::Result<()> {
    match event.event {
        EventKind::Open => {
            let borrower = labels.borrower(event.borrower.as_deref().ok_or_else(|| missing("borrower"))?);
            let label = event.obligation.clone().ok_or_else(|| missing("obligation"))?;
            let amount = Amount::new(event.amount.ok_or_else(|| missing("amount"))?)?;
            let deadline = event.date.ok_or_else(|| missing("date"))?;
            let kind = event.kind.unwrap_or(ObligationKind::Loan);
            let obligation = intake.open(borrower, kind, amount, deadline).await?;
            labels.obligations.insert(label, obligation.id);
        }
        EventKind::Approve => {
            let id = resolve(labels, event)?;
            intake.approve(id).await?;
        }
        EventKind::Reject => {
            let id = resolve(labels, event)?;
            intake.reject(id, "rejected by authorizer").await?;
        }
        EventKind::Payment | EventKind::Confirm => {
            let id = resolve(labels, event)?;
            let token = event.token.as_deref().ok_or_else(|| missing("token"))?;
            let amount = Amount::new(event.amount.ok_or_else(|| missing("amount"))?)?;
            if event.event == EventKind::Payment {
                engine
                    .apply_payment(
                        token,
                        id,
                        amount,
                        chopbook::domain::payment::PaymentSource::ProviderCallback,
                    )
                    .await?;
            } else {
                engine.confirm_payment(token, id, amount).await?;
            }
        }
        EventKind::Chop => {
            let borrower = labels.borrower(event.borrower.as_deref().ok_or_else(|| missing("borrower"))?);
            let amount = Amount::new(event.amount.ok_or_else(|| missing("amount"))?)?;
            let period = event.period.as_deref().unwrap_or("unspecified");
            match processor
                .process_deduction(borrower, amount, event.token.as_deref(), period)
                .await
            {
                Ok(result) => {
                    tracing::info!(
                        borrower = event.borrower.as_deref().unwrap_or(""),
                        applied = result.applied.len(),
                        unapplied = %result.unapplied,
                        aggregate = %result.aggregate_balance,
                        "deduction processed"
                    );
                }
                // Benign: nothing outstanding to deduct against.
                Err(LedgerError::NoOutstandingObligations { .. }) => {
                    tracing::info!(
                        borrower = event.borrower.as_deref().unwrap_or(""),
                        "no outstanding obligations, deduction skipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        EventKind::MarkOverdue => {
            let id = resolve(labels, event)?;
            policy.mark_overdue(id).await?;
        }
        EventKind::Sweep => {
            let as_of = event.date.ok_or_else(|| missing("date"))?;
            policy.sweep(as_of).await?;
        }
    }
    Ok(())
}

fn resolve(labels: &Labels, event: &LedgerEvent) -> chopbook::error::Result<Uuid> {
    let label = event.obligation.as_deref().ok_or_else(|| missing("obligation"))?;
    labels
        .obligation(label)
        .ok_or_else(|| LedgerError::Storage(format!("unknown obligation label `{label}`")))
}
