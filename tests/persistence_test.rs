#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("ledger_db");

    // First run: open, approve and partially repay a loan.
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "event,borrower,obligation,kind,token,amount,date,period").unwrap();
    writeln!(csv1, "open,alice,loan1,loan,,100000,2026-06-30,").unwrap();
    writeln!(csv1, "approve,,loan1,,,,,").unwrap();
    writeln!(csv1, "payment,,loan1,,tx1,40000,,").unwrap();

    let output1 = Command::new(cargo_bin!("chopbook"))
        .arg(csv1.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("first run");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("loan1,alice,loan,100000,60000,active"));

    // Second run against the same database with no new events: the
    // obligation and its balance are recovered from disk.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "event,borrower,obligation,kind,token,amount,date,period").unwrap();

    let output2 = Command::new(cargo_bin!("chopbook"))
        .arg(csv2.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("second run");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains(",100000,60000,active"));
}
