//! Integration tests for the cluster-wide mutex (S3).

use taskforge_db::queries::cluster_mutex;

use taskforge_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn second_acquire_fails_while_lease_is_held() {
    let (pool, db_name) = create_test_db().await;

    let first = cluster_mutex::try_acquire(&pool, "taskPollingJob", "replica-a", 5)
        .await
        .expect("first acquire should not error");
    assert!(first, "first replica should acquire the mutex");

    let second = cluster_mutex::try_acquire(&pool, "taskPollingJob", "replica-b", 5)
        .await
        .expect("second acquire should not error");
    assert!(!second, "second replica must not acquire while the lease is live");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn release_lets_another_replica_acquire_immediately() {
    let (pool, db_name) = create_test_db().await;

    cluster_mutex::try_acquire(&pool, "staleTaskCleanup", "replica-a", 5)
        .await
        .expect("acquire should succeed");
    cluster_mutex::release(&pool, "staleTaskCleanup", "replica-a")
        .await
        .expect("release should succeed");

    let acquired = cluster_mutex::try_acquire(&pool, "staleTaskCleanup", "replica-b", 5)
        .await
        .expect("acquire after release should not error");
    assert!(acquired, "a released mutex should be acquirable immediately");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn release_by_non_owner_is_a_no_op() {
    let (pool, db_name) = create_test_db().await;

    cluster_mutex::try_acquire(&pool, "taskPollingJob", "replica-a", 5)
        .await
        .expect("acquire should succeed");
    cluster_mutex::release(&pool, "taskPollingJob", "replica-b")
        .await
        .expect("release should not error even for a non-owner");

    let still_held = cluster_mutex::try_acquire(&pool, "taskPollingJob", "replica-c", 5)
        .await
        .expect("acquire attempt should not error");
    assert!(!still_held, "a non-owner's release must not free the lease");

    drop_test_db(&db_name).await;
}
