//! Implementation of the `allocate` command.
//!
//! Runs one allocation request. Ctrl-C stops the engine at the next batch
//! boundary; whatever was created by then is kept and reported.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Completion, Output};
use crate::config::AdminConfig;
use xtrace_core::Alphabet;
use xtrace_db::{AllocationReport, AllocationRequest, AllocatorConfig, Database};

/// Arguments of one `allocate` invocation.
#[derive(Debug, Clone)]
pub struct AllocateArgs {
    pub pool_id: String,
    pub quantity: i64,
    pub length: usize,
    pub alphabet: Option<String>,
}

pub async fn run(
    db: &Database,
    config: &AdminConfig,
    out: &Output,
    args: AllocateArgs,
) -> Result<Completion> {
    let allocator = AllocatorConfig::default()
        .batch_size(config.batch_size)
        .attempt_multiplier(config.attempt_multiplier);
    allocator.validate().context("Invalid allocator settings")?;

    let mut request = AllocationRequest::new(&args.pool_id, args.quantity, args.length);
    if let Some(symbols) = &args.alphabet {
        request = request.alphabet(Alphabet::new(symbols).context("Invalid alphabet")?);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            on_interrupt.cancel();
        }
    });

    let result = db
        .allocation_service(allocator)
        .allocate(&request, &cancel)
        .await;
    watcher.abort();

    let report = result.with_context(|| format!("Allocation on pool {} failed", args.pool_id))?;
    info!(
        pool_id = %report.pool_id,
        created = report.created_count,
        requested = report.requested_count,
        stop = %report.stop,
        "Allocation finished"
    );

    out.emit(&report, || describe(&report))?;

    Ok(if report.is_full() {
        Completion::Done
    } else {
        Completion::Partial
    })
}

fn describe(report: &AllocationReport) -> String {
    let headline = if report.is_full() {
        "Allocation complete"
    } else {
        "Allocation PARTIAL"
    };
    format!(
        "{headline}\n\
         pool:       {}\n\
         requested:  {}\n\
         granted:    {}\n\
         created:    {}\n\
         attempts:   {} ({} duplicates, {} batches)\n\
         stopped:    {}\n\
         pool state: {} ({} of {})",
        report.pool_id,
        report.requested_count,
        report.granted_count,
        report.created_count,
        report.attempts,
        report.duplicates,
        report.batches,
        report.stop,
        report.pool.status,
        report.pool.generated_count,
        report.pool.total_to_generate,
    )
}
