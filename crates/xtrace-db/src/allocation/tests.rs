//! End-to-end tests of the allocation pipeline.

use std::collections::HashSet;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use super::engine::{AllocatorConfig, StopReason};
use super::{AllocationOutcomeKind, AllocationRequest, AllocationService};
use crate::error::{AllocationError, DbError};
use crate::pool::{Database, DbConfig};
use xtrace_core::{Alphabet, CoreError, LotAssignment, NewSerialPool, PoolStatus, SerialStatus};

const GTIN: &str = "4006381333931";

async fn memory_service(config: AllocatorConfig) -> (Database, AllocationService) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let service = db.allocation_service(config);
    (db, service)
}

async fn create(service: &AllocationService, pool_id: &str, total: i64) {
    service
        .create_pool(&NewSerialPool {
            pool_id: Some(pool_id.to_string()),
            product_gtin: GTIN.to_string(),
            total_to_generate: total,
        })
        .await
        .unwrap();
}

async fn all_serials(db: &Database) -> Vec<String> {
    sqlx::query_scalar("SELECT full_serial_number FROM serial_numbers")
        .fetch_all(db.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_pool_normalizes_gtin_and_rejects_bad_input() {
    let (_db, service) = memory_service(AllocatorConfig::default()).await;

    let pool = service
        .create_pool(&NewSerialPool {
            pool_id: None,
            product_gtin: GTIN.to_string(),
            total_to_generate: 5,
        })
        .await
        .unwrap();
    assert_eq!(pool.product_gtin, "04006381333931");
    assert_eq!(pool.status, PoolStatus::New);

    let err = service
        .create_pool(&NewSerialPool {
            pool_id: Some("P1".to_string()),
            product_gtin: "4006381333932".to_string(),
            total_to_generate: 5,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
}

#[tokio::test]
async fn test_full_pool_scenario() {
    let (db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 100).await;

    let report = service
        .allocate(&AllocationRequest::new("P1", 100, 12), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.created_count, 100);
    assert_eq!(report.outcome(), AllocationOutcomeKind::Full);
    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.pool.status, PoolStatus::Exhausted);
    assert_eq!(report.pool.generated_count, 100);
    assert_eq!(report.pool.reserved_count, 100);

    let serials = all_serials(&db).await;
    assert_eq!(serials.len(), 100);
    assert_eq!(serials.iter().collect::<HashSet<_>>().len(), 100);
    assert!(serials
        .iter()
        .all(|s| s.len() == 12 && s.bytes().all(|b| b.is_ascii_alphanumeric())));

    let err = service
        .allocate(&AllocationRequest::new("P1", 1, 12), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AllocationError::Rejected(CoreError::PoolExhausted { .. })
    ));
}

#[tokio::test]
async fn test_partial_success_is_reported_honestly() {
    let (db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 10).await;

    let request = AllocationRequest::new("P1", 10, 2).alphabet(Alphabet::new("AB").unwrap());
    let report = service.allocate(&request, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.requested_count, 10);
    assert_eq!(report.created_count, 4);
    assert_eq!(report.outcome(), AllocationOutcomeKind::Partial);
    assert_eq!(report.stop, StopReason::AttemptCeilingExceeded);

    // Unused capacity went back to the pool
    assert_eq!(report.pool.generated_count, 4);
    assert_eq!(report.pool.reserved_count, 4);
    assert_eq!(report.pool.status, PoolStatus::Active);
    assert_eq!(db.serial_numbers().count_for_pool("P1").await.unwrap(), 4);
}

#[tokio::test]
async fn test_tiny_candidate_space_always_yields_every_value() {
    // Shipped defaults, many fresh runs: the 4 possible serials always land
    for run in 0..200 {
        let (_db, service) = memory_service(AllocatorConfig::default()).await;
        create(&service, "P1", 10).await;

        let request = AllocationRequest::new("P1", 10, 2).alphabet(Alphabet::new("AB").unwrap());
        let report = service.allocate(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.created_count, 4, "run {run} created {}", report.created_count);
        assert_eq!(report.stop, StopReason::AttemptCeilingExceeded);
    }
}

#[tokio::test]
async fn test_retry_only_adds_up_to_remaining_capacity() {
    let (db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 50).await;

    let first = service
        .allocate(&AllocationRequest::new("P1", 30, 12), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.created_count, 30);
    let before: HashSet<_> = all_serials(&db).await.into_iter().collect();

    // Asks for more than is left
    let retry = service
        .allocate(&AllocationRequest::new("P1", 30, 12), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(retry.granted_count, 20);
    assert_eq!(retry.created_count, 20);
    assert_eq!(retry.outcome(), AllocationOutcomeKind::Partial);
    assert_eq!(retry.pool.status, PoolStatus::Exhausted);

    let after: HashSet<_> = all_serials(&db).await.into_iter().collect();
    assert_eq!(after.len(), 50);
    assert!(before.is_subset(&after));
}

#[tokio::test]
async fn test_rejections() {
    let (_db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 10).await;
    let cancel = CancellationToken::new();

    let err = service
        .allocate(&AllocationRequest::new("missing", 1, 12), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::Rejected(CoreError::PoolNotFound(_))));

    let err = service
        .allocate(&AllocationRequest::new("P1", 0, 12), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::Rejected(CoreError::Validation(_))));

    let err = service
        .allocate(&AllocationRequest::new("P1", 1, 21), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::Rejected(CoreError::Validation(_))));

    service.void_pool("P1").await.unwrap();
    let err = service
        .allocate(&AllocationRequest::new("P1", 1, 12), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(matches!(err, AllocationError::Rejected(CoreError::PoolVoided(_))));
}

#[tokio::test]
async fn test_cancelled_request_releases_its_ticket() {
    let (_db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 10).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = service
        .allocate(&AllocationRequest::new("P1", 10, 12), &cancel)
        .await
        .unwrap();

    assert_eq!(report.created_count, 0);
    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.pool.reserved_count, 0);
}

#[tokio::test]
async fn test_print_transition_lifecycle() {
    let (_db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 5).await;
    service
        .allocate(&AllocationRequest::new("P1", 5, 12), &CancellationToken::new())
        .await
        .unwrap();

    let lot = LotAssignment {
        batch_lot: "LOT-7".to_string(),
        expiration_date: NaiveDate::from_ymd_opt(2028, 3, 1).unwrap(),
    };
    let printed = service.print("P1", 3, &lot).await.unwrap();
    assert_eq!(printed.len(), 3);

    let serial = printed[0].full_serial_number.clone();
    let err = service.transition(&serial, SerialStatus::Allocated).await.unwrap_err();
    assert!(matches!(err, DbError::Domain(CoreError::InvalidSerialTransition { .. })));

    let consumed = service.transition(&serial, SerialStatus::Consumed).await.unwrap();
    assert_eq!(consumed.status, SerialStatus::Consumed);

    assert_eq!(service.printed_serials("P1", 100).await.unwrap().len(), 2);

    let bad_lot = LotAssignment {
        batch_lot: "L".repeat(21),
        ..lot
    };
    let err = service.print("P1", 1, &bad_lot).await.unwrap_err();
    assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_stay_unique_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("xtrace.db")))
        .await
        .unwrap();
    let service = db.allocation_service(AllocatorConfig::default().batch_size(50));
    create(&service, "P1", 300).await;
    create(&service, "P2", 300).await;

    // 8 requests of 60 against two pools of 300: 480 asked per pool
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = service.clone();
            let pool_id = if i % 2 == 0 { "P1" } else { "P2" };
            tokio::spawn(async move {
                service
                    .allocate(&AllocationRequest::new(pool_id, 60, 6), &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for handle in handles {
        match handle.await.unwrap() {
            Ok(report) => assert!(report.created_count <= 60),
            Err(err) => assert!(matches!(
                err,
                AllocationError::Rejected(CoreError::PoolExhausted { .. })
            )),
        }
    }

    let serials = all_serials(&db).await;
    assert_eq!(serials.iter().collect::<HashSet<_>>().len(), serials.len());

    for pool_id in ["P1", "P2"] {
        let pool = service.get_pool(pool_id).await.unwrap();
        let stored = db.serial_numbers().count_for_pool(pool_id).await.unwrap();
        assert!(stored <= 300);
        assert_eq!(pool.generated_count, stored);
        assert_eq!(pool.reserved_count, stored);
    }
}

#[tokio::test]
async fn test_store_failure_surfaces_with_context() {
    let (db, service) = memory_service(AllocatorConfig::default()).await;
    create(&service, "P1", 10).await;

    // Serials can't be inserted once the table refuses writes
    sqlx::query(
        "CREATE TRIGGER reject_serials BEFORE INSERT ON serial_numbers
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = service
        .allocate(&AllocationRequest::new("P1", 10, 12), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        AllocationError::StoreFailure {
            pool_id,
            requested,
            created,
            ..
        } => {
            assert_eq!(pool_id, "P1");
            assert_eq!(requested, 10);
            assert_eq!(created, 0);
        }
        other => panic!("expected store failure, got {other:?}"),
    }

    // The failed request still gave its capacity back
    let pool = service.get_pool("P1").await.unwrap();
    assert_eq!(pool.reserved_count, 0);
    assert_eq!(pool.generated_count, 0);
}

#[tokio::test]
async fn test_store_failure_keeps_committed_batches() {
    let (db, service) = memory_service(AllocatorConfig::default().batch_size(100)).await;
    create(&service, "P1", 300).await;

    // The table fills up after the first batch
    sqlx::query(
        "CREATE TRIGGER table_full BEFORE INSERT ON serial_numbers
         WHEN (SELECT COUNT(*) FROM serial_numbers) >= 100
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = service
        .allocate(&AllocationRequest::new("P1", 300, 12), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AllocationError::StoreFailure {
            requested: 300,
            created: 100,
            ..
        }
    ));

    // First batch stands, the rest of the ticket went back
    assert_eq!(db.serial_numbers().count_for_pool("P1").await.unwrap(), 100);
    let pool = service.get_pool("P1").await.unwrap();
    assert_eq!(pool.generated_count, 100);
    assert_eq!(pool.reserved_count, 100);
    assert_eq!(pool.status, PoolStatus::Active);
}

#[tokio::test]
async fn test_cancel_mid_run_reports_what_landed() {
    let (db, service) = memory_service(AllocatorConfig::default().batch_size(25)).await;
    create(&service, "P1", 50_000).await;
    let cancel = CancellationToken::new();

    let request = AllocationRequest::new("P1", 50_000, 12);
    let run = service.allocate(&request, &cancel);
    let stopper = async {
        while db.serial_numbers().count_for_pool("P1").await.unwrap() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(run, stopper);
    let report = report.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.outcome(), AllocationOutcomeKind::Partial);
    assert!(report.created_count >= 25 && report.created_count < 50_000);

    let stored = db.serial_numbers().count_for_pool("P1").await.unwrap();
    assert_eq!(stored, report.created_count);
    assert_eq!(report.pool.generated_count, stored);
    assert_eq!(report.pool.reserved_count, stored);
    assert_eq!(report.pool.status, PoolStatus::Active);
}
