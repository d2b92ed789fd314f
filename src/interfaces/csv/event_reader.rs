use crate::domain::obligation::ObligationKind;
use crate::error::{LedgerError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// The replayable ledger events a CSV stream can carry. Each maps onto one
/// of the engine's boundary operations.
#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Approve,
    Reject,
    Payment,
    Confirm,
    Chop,
    MarkOverdue,
    Sweep,
}

/// One row of the event stream. Columns not used by a given event kind are
/// left empty; the replay validates presence per kind.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct LedgerEvent {
    pub event: EventKind,
    pub borrower: Option<String>,
    pub obligation: Option<String>,
    pub kind: Option<ObligationKind>,
    pub token: Option<String>,
    pub amount: Option<Decimal>,
    pub date: Option<NaiveDate>,
    pub period: Option<String>,
}

/// Streams ledger events from a CSV source without loading the whole file.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn events(self) -> impl Iterator<Item = Result<LedgerEvent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "event,borrower,obligation,kind,token,amount,date,period";

    #[test]
    fn parses_open_and_payment_rows() {
        let data = format!(
            "{HEADER}\n\
             open,alice,loan1,loan,,5000000,2026-06-30,\n\
             payment,,loan1,,tx1,2000000,,"
        );
        let events: Vec<_> = EventReader::new(data.as_bytes())
            .events()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, EventKind::Open);
        assert_eq!(events[0].borrower.as_deref(), Some("alice"));
        assert_eq!(events[0].kind, Some(ObligationKind::Loan));
        assert_eq!(events[0].amount, Some(dec!(5000000)));
        assert_eq!(
            events[0].date,
            Some(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap())
        );

        assert_eq!(events[1].event, EventKind::Payment);
        assert_eq!(events[1].token.as_deref(), Some("tx1"));
        assert!(events[1].borrower.is_none());
    }

    #[test]
    fn parses_chop_and_sweep_rows() {
        let data = format!(
            "{HEADER}\n\
             chop,alice,,,cb-77,3500000,,2026-S1\n\
             sweep,,,,,,2026-09-01,"
        );
        let events: Vec<_> = EventReader::new(data.as_bytes())
            .events()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(events[0].event, EventKind::Chop);
        assert_eq!(events[0].period.as_deref(), Some("2026-S1"));
        assert_eq!(events[1].event, EventKind::Sweep);
        assert_eq!(
            events[1].date,
            Some(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap())
        );
    }

    #[test]
    fn malformed_row_surfaces_as_error() {
        let data = format!("{HEADER}\nnot_an_event,,,,,,,");
        let results: Vec<_> = EventReader::new(data.as_bytes()).events().collect();
        assert!(results[0].is_err());
    }
}
