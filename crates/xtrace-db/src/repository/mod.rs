//! # Repository Module
//!
//! Database repository implementations for XTrace.
//!
//! ## Repositories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Allocation pipeline / CLI                                             │
//! │       │                                                                 │
//! │       │  db.serial_pools().get_by_id("P1")                             │
//! │       │  db.serial_numbers().insert_batch("P1", &batch, 500, now)      │
//! │       ▼                                                                 │
//! │  SerialPoolRepository              SerialNumberRepository              │
//! │  ├── insert / get_by_id / list     ├── insert_batch (ignore conflicts) │
//! │  ├── compare_and_reserve           ├── get / count_for_pool            │
//! │  ├── reconcile_counts              ├── count_by_status                 │
//! │  └── set_void                      ├── list_by_pool_and_status         │
//! │                                    ├── mark_printed                    │
//! │                                    └── transition                      │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  serial_pools                      serial_numbers                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Counter changes on `serial_pools` go through the reservation coordinator;
//! call the pool repository's swap methods directly only in tests.

pub mod serial;
pub mod serial_pool;
