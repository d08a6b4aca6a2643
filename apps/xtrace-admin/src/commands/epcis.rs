//! Implementation of the `export-epcis` command.
//!
//! Builds one commissioning event from a pool's PRINTED serials. An event
//! covers a single lot: `--lot` picks it, otherwise the lot of the oldest
//! printed serial is used.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::{Completion, Output};
use crate::config::AdminConfig;
use xtrace_core::epcis::{encode_commissioning, DocumentFormat, EpcisError};
use xtrace_core::SerialNumber;
use xtrace_db::{AllocatorConfig, Database};

/// Arguments of one `export-epcis` invocation.
#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub pool_id: String,
    pub format: DocumentFormat,
    pub lot: Option<String>,
    pub limit: i64,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ExportSummary<'a> {
    pool_id: &'a str,
    batch_lot: &'a str,
    serials: usize,
    output: String,
}

pub async fn run(
    db: &Database,
    config: &AdminConfig,
    out: &Output,
    args: ExportArgs,
) -> Result<Completion> {
    let epcis = config.epcis()?;

    let service = db.allocation_service(AllocatorConfig::default());
    let pool = service.get_pool(&args.pool_id).await?;
    let printed = service.printed_serials(&args.pool_id, args.limit).await?;

    let serials = select_lot(printed, args.lot.as_deref())?;
    let batch_lot = serials
        .first()
        .and_then(|s| s.batch_lot.clone())
        .unwrap_or_default();

    let document = encode_commissioning(
        &epcis,
        &pool.product_gtin,
        &serials,
        args.format,
        Utc::now(),
    )?;

    let Some(path) = &args.output else {
        println!("{document}");
        return Ok(Completion::Done);
    };

    std::fs::write(path, document.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(pool_id = %args.pool_id, lot = %batch_lot, serials = serials.len(), "EPCIS document written");

    let summary = ExportSummary {
        pool_id: &args.pool_id,
        batch_lot: &batch_lot,
        serials: serials.len(),
        output: path.display().to_string(),
    };
    out.emit(&summary, || {
        format!(
            "Wrote {} serials of lot {} to {}",
            summary.serials, summary.batch_lot, summary.output
        )
    })?;
    Ok(Completion::Done)
}

/// Keeps the serials of one lot.
fn select_lot(printed: Vec<SerialNumber>, lot: Option<&str>) -> Result<Vec<SerialNumber>, EpcisError> {
    let wanted = match lot {
        Some(lot) => lot.to_string(),
        None => match printed.first() {
            Some(first) => first
                .batch_lot
                .clone()
                .ok_or_else(|| EpcisError::MissingLot(first.full_serial_number.clone()))?,
            None => return Err(EpcisError::Empty),
        },
    };

    let selected: Vec<_> = printed
        .into_iter()
        .filter(|s| s.batch_lot.as_deref() == Some(wanted.as_str()))
        .collect();

    if selected.is_empty() {
        return Err(EpcisError::Empty);
    }
    Ok(selected)
}
