//! # Per-Pool Locks
//!
//! One async mutex per pool id, created on demand.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PoolLocks                                                              │
//! │  parking_lot::Mutex<HashMap<pool_id, Arc<tokio::Mutex<()>>>>            │
//! │                                                                         │
//! │   "P1" ──► Arc<Mutex> ◄── request A (holding)                          │
//! │                       ◄── request B (waiting)                          │
//! │   "P2" ──► Arc<Mutex> ◄── request C (holding)   ← independent of P1    │
//! │                                                                         │
//! │  The outer map lock is held only to look up / insert an entry, never   │
//! │  across an await.                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries nobody else references are dropped on the next acquire so the map
//! stays proportional to the number of pools currently being touched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of per-pool async mutexes.
#[derive(Debug, Default)]
pub struct PoolLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a pool's counters are being read and written.
#[derive(Debug)]
pub struct PoolGuard {
    pool_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl PoolGuard {
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }
}

impl PoolLocks {
    pub fn new() -> Self {
        PoolLocks::default()
    }

    /// Waits for exclusive access to `pool_id`.
    pub async fn acquire(&self, pool_id: &str) -> PoolGuard {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|id, lock| id == pool_id || Arc::strong_count(lock) > 1);
            locks
                .entry(pool_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        PoolGuard {
            pool_id: pool_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of pools with a live lock entry.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
