use futures_util::future::join_all;
use settlement_engine::{
    db_types::{DuplicateCheckKind, DuplicateCheckResult},
    test_utils::prepare_env::{setup, tear_down},
    DuplicateCheckStore,
    StoreError,
};

#[tokio::test]
async fn first_seen_then_exact_resend() {
    let db = setup().await;
    let first = db.check_and_insert(DuplicateCheckKind::Transfer, "T1", "h1").await.unwrap();
    assert_eq!(first, DuplicateCheckResult::first_seen());
    assert!(first.is_first_seen());
    let second = db.check_and_insert(DuplicateCheckKind::Transfer, "T1", "h1").await.unwrap();
    assert_eq!(second, DuplicateCheckResult { exists_matching: true, exists_not_matching: false });
    assert!(second.is_resend());
    let record = db.fetch_duplicate_check(DuplicateCheckKind::Transfer, "T1").await.unwrap().unwrap();
    assert_eq!(record.identity, "T1");
    assert_eq!(record.hash, "h1");
    tear_down(db).await;
}

#[tokio::test]
async fn modified_request_leaves_the_record_alone() {
    let db = setup().await;
    db.check_and_insert(DuplicateCheckKind::Transfer, "T1", "h1").await.unwrap();
    let result = db.check_and_insert(DuplicateCheckKind::Transfer, "T1", "h2").await.unwrap();
    assert_eq!(result, DuplicateCheckResult { exists_matching: false, exists_not_matching: true });
    assert!(result.is_modified_request());
    let record = db.fetch_duplicate_check(DuplicateCheckKind::Transfer, "T1").await.unwrap().unwrap();
    assert_eq!(record.hash, "h1");
    tear_down(db).await;
}

#[tokio::test]
async fn identity_spaces_are_independent() {
    let db = setup().await;
    db.check_and_insert(DuplicateCheckKind::Transfer, "X1", "h1").await.unwrap();
    let bulk = db.check_and_insert(DuplicateCheckKind::BulkTransfer, "X1", "h2").await.unwrap();
    assert!(bulk.is_first_seen());
    assert!(db.fetch_duplicate_check(DuplicateCheckKind::BulkTransfer, "unknown").await.unwrap().is_none());
    tear_down(db).await;
}

#[tokio::test]
async fn save_refuses_to_overwrite() {
    let db = setup().await;
    let record = db.save_duplicate_check(DuplicateCheckKind::BulkTransfer, "B1", "h1").await.unwrap();
    assert_eq!(record.hash, "h1");
    let err = db.save_duplicate_check(DuplicateCheckKind::BulkTransfer, "B1", "h2").await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateCheckExists(id) if id == "B1"));
    let record = db.fetch_duplicate_check(DuplicateCheckKind::BulkTransfer, "B1").await.unwrap().unwrap();
    assert_eq!(record.hash, "h1");
    tear_down(db).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_attempts_insert_once() {
    const N: usize = 10;
    let db = setup().await;
    let tasks = (0..N).map(|_| {
        let db = db.clone();
        tokio::spawn(async move { db.check_and_insert(DuplicateCheckKind::Transfer, "T-race", "h").await })
    });
    let results = join_all(tasks).await.into_iter().map(|r| r.unwrap().unwrap()).collect::<Vec<_>>();
    let first_seen = results.iter().filter(|r| r.is_first_seen()).count();
    let resends = results.iter().filter(|r| r.is_resend()).count();
    assert_eq!(first_seen, 1);
    assert_eq!(resends, N - 1);
    tear_down(db).await;
}
