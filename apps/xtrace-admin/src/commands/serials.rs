//! Serial lifecycle: `print` and `transition`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use super::{Completion, Output};
use xtrace_core::{LotAssignment, SerialNumber, SerialStatus};
use xtrace_db::{AllocatorConfig, Database};

#[derive(Debug, Serialize)]
struct PrintReport<'a> {
    pool_id: &'a str,
    requested: i64,
    printed: usize,
    batch_lot: &'a str,
    expiration_date: NaiveDate,
    serials: Vec<&'a str>,
}

/// Claims up to `count` allocated serials. Fewer than asked is reported as
/// partial.
pub async fn print(
    db: &Database,
    out: &Output,
    pool_id: &str,
    count: i64,
    batch_lot: String,
    expiration_date: NaiveDate,
) -> Result<Completion> {
    let lot = LotAssignment {
        batch_lot,
        expiration_date,
    };
    let printed = db
        .allocation_service(AllocatorConfig::default())
        .print(pool_id, count, &lot)
        .await
        .with_context(|| format!("Failed to print serials of pool {pool_id}"))?;

    let report = PrintReport {
        pool_id,
        requested: count,
        printed: printed.len(),
        batch_lot: &lot.batch_lot,
        expiration_date: lot.expiration_date,
        serials: printed.iter().map(|s| s.full_serial_number.as_str()).collect(),
    };
    out.emit(&report, || {
        let mut text = format!(
            "Printed {} of {} serials (lot {}, expires {})",
            report.printed, report.requested, report.batch_lot, report.expiration_date
        );
        for serial in &report.serials {
            text.push('\n');
            text.push_str(serial);
        }
        text
    })?;

    Ok(if (printed.len() as i64) < count {
        Completion::Partial
    } else {
        Completion::Done
    })
}

pub async fn transition(
    db: &Database,
    out: &Output,
    serial: &str,
    to: SerialStatus,
) -> Result<Completion> {
    let updated: SerialNumber = db
        .allocation_service(AllocatorConfig::default())
        .transition(serial, to)
        .await
        .with_context(|| format!("Failed to move serial {serial} to {to}"))?;

    out.emit(&updated, || {
        format!("{} is now {}", updated.full_serial_number, updated.status)
    })?;
    Ok(Completion::Done)
}
