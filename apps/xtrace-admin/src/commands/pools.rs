//! Pool management: `create-pool`, `show-pool`, `list-pools`, `void-pool`,
//! `recover`.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use super::{Completion, Output};
use xtrace_core::{NewSerialPool, PoolStatus, SerialPool, SerialStatus};
use xtrace_db::{AllocatorConfig, Database};

#[derive(Debug, Serialize)]
struct PoolDetail<'a> {
    #[serde(flatten)]
    pool: &'a SerialPool,
    serials: Vec<StatusCount>,
}

#[derive(Debug, Serialize)]
struct StatusCount {
    status: SerialStatus,
    count: i64,
}

pub async fn create(
    db: &Database,
    out: &Output,
    pool_id: Option<String>,
    product_gtin: String,
    total_to_generate: i64,
) -> Result<Completion> {
    let new = NewSerialPool {
        pool_id,
        product_gtin,
        total_to_generate,
    };
    let pool = db
        .allocation_service(AllocatorConfig::default())
        .create_pool(&new)
        .await
        .context("Failed to create pool")?;

    out.emit(&pool, || format!("Created pool\n{}", summary(&pool)))?;
    Ok(Completion::Done)
}

pub async fn show(db: &Database, out: &Output, pool_id: &str) -> Result<Completion> {
    let service = db.allocation_service(AllocatorConfig::default());
    let pool = service.get_pool(pool_id).await?;
    let counts = service.status_counts(pool_id).await?;

    let detail = PoolDetail {
        pool: &pool,
        serials: counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
    };

    out.emit(&detail, || {
        let mut text = summary(&pool);
        for entry in &detail.serials {
            text.push_str(&format!("\n  {:<10} {}", entry.status.as_str(), entry.count));
        }
        text
    })?;
    Ok(Completion::Done)
}

pub async fn list(db: &Database, out: &Output, status: Option<PoolStatus>) -> Result<Completion> {
    let pools = db.serial_pools().list(status).await?;

    out.emit(&pools, || {
        if pools.is_empty() {
            return "No pools".to_string();
        }
        pools
            .iter()
            .map(|p| {
                format!(
                    "{:<38} {:<10} {:>10}/{:<10} {}",
                    p.pool_id,
                    p.status.as_str(),
                    p.generated_count,
                    p.total_to_generate,
                    p.product_gtin
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(Completion::Done)
}

pub async fn void(db: &Database, out: &Output, pool_id: &str) -> Result<Completion> {
    let pool = db
        .allocation_service(AllocatorConfig::default())
        .void_pool(pool_id)
        .await
        .with_context(|| format!("Failed to void pool {pool_id}"))?;

    out.emit(&pool, || format!("Pool voided\n{}", summary(&pool)))?;
    Ok(Completion::Done)
}

pub async fn recover(db: &Database, out: &Output, pool_id: &str) -> Result<Completion> {
    warn!(pool_id, "Recovering pool counters; no allocation may be running on it");

    let pool = db
        .allocation_service(AllocatorConfig::default())
        .recover(pool_id)
        .await
        .with_context(|| format!("Failed to recover pool {pool_id}"))?;

    out.emit(&pool, || format!("Pool recovered\n{}", summary(&pool)))?;
    Ok(Completion::Done)
}

/// Multi-line description of a pool.
pub fn summary(pool: &SerialPool) -> String {
    format!(
        "pool:      {}\n\
         gtin:      {}\n\
         status:    {}\n\
         generated: {} of {} (reserved {})\n\
         remaining: {}\n\
         updated:   {}",
        pool.pool_id,
        pool.product_gtin,
        pool.status,
        pool.generated_count,
        pool.total_to_generate,
        pool.reserved_count,
        pool.remaining(),
        pool.updated_at.to_rfc3339()
    )
}
