use std::time::Duration;

use super::jobs::*;
use super::test_helpers::{set_available_in, with_test_db};
use crate::types::{JobFilter, JobState, NewJob};

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_claim_sets_lease_and_increments_attempts() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.lease_expires_at.is_none());

    let claimed = claim_job(&*pool, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state, JobState::Processing);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.payload, b"hello".to_vec());
    assert!(claimed.started_at.is_some());
    let lease = claimed.lease_expires_at.unwrap();
    let started = claimed.started_at.unwrap();
    assert!(lease - started >= chrono::Duration::seconds(29));

    assert!(claim_job(&*pool, Duration::from_secs(30)).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_concurrent_claims_are_mutually_exclusive() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new()))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = (*pool).clone();
        handles.push(tokio::spawn(async move {
            claim_job(&pool, Duration::from_secs(30)).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap() {
            winners.push(claimed);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, job.id);
    assert_eq!(winners[0].attempts, 1);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_claim_ignores_future_jobs() {
    let pool = with_test_db().await;

    enqueue_job(
        &*pool,
        &NewJob::new("report", Vec::new()).delay(Duration::from_secs(3600)),
    )
    .await
    .unwrap();

    assert!(claim_job(&*pool, Duration::from_secs(30)).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_claim_orders_by_available_at() {
    let pool = with_test_db().await;

    let later = enqueue_job(&*pool, &NewJob::new("a", Vec::new())).await.unwrap();
    let earlier = enqueue_job(&*pool, &NewJob::new("b", Vec::new())).await.unwrap();
    set_available_in(&pool, later.id, -5.0).await;
    set_available_in(&pool, earlier.id, -60.0).await;

    let first = claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();
    let second = claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(first.id, earlier.id);
    assert_eq!(second.id, later.id);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_mark_succeeded_is_terminal() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();

    mark_succeeded(&*pool, job.id).await.unwrap();

    let stored = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert!(stored.lease_expires_at.is_none());

    // Double report and late transitions all lose
    assert!(mark_succeeded(&*pool, job.id).await.unwrap_err().is_not_found());
    assert!(mark_failed(&*pool, job.id, "late").await.unwrap_err().is_not_found());
    assert!(mark_retry(&*pool, job.id, "late", Duration::from_secs(1))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(claim_job(&*pool, Duration::from_secs(30)).await.unwrap().is_none());

    let stored = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_mark_retry_delays_visibility() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();

    mark_retry(&*pool, job.id, "smtp timeout", Duration::from_secs(1))
        .await
        .unwrap();

    let stored = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.last_error.as_deref(), Some("smtp timeout"));
    assert!(stored.lease_expires_at.is_none());
    assert_eq!(stored.attempts, 1);

    assert!(claim_job(&*pool, Duration::from_secs(30)).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let reclaimed = claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_mark_failed_records_error() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new()).max_attempts(1))
        .await
        .unwrap();
    claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();

    mark_failed(&*pool, job.id, "bad address").await.unwrap();

    let stored = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("bad address"));
    assert!(stored.lease_expires_at.is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_reap_only_after_lease_expires() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    claim_job(&*pool, Duration::from_secs(1)).await.unwrap().unwrap();

    assert_eq!(reap_expired(&*pool).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(reap_expired(&*pool).await.unwrap(), 1);
    assert_eq!(reap_expired(&*pool).await.unwrap(), 0);

    let stored = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.attempts, 1);
    assert!(stored.lease_expires_at.is_none());

    // The reaped worker's late report loses
    assert!(mark_succeeded(&*pool, job.id).await.unwrap_err().is_not_found());

    let reclaimed = claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_extend_lease_postpones_reaping() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    let claimed = claim_job(&*pool, Duration::from_secs(1)).await.unwrap().unwrap();
    let started_at = claimed.started_at.unwrap();

    extend_lease(&*pool, job.id, started_at, Duration::from_secs(60)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(reap_expired(&*pool).await.unwrap(), 0);

    mark_succeeded(&*pool, job.id).await.unwrap();
    assert!(extend_lease(&*pool, job.id, started_at, Duration::from_secs(60))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_extend_lease_ignores_superseded_claim() {
    let pool = with_test_db().await;

    let job = enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    let first = claim_job(&*pool, Duration::from_millis(200)).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reap_expired(&*pool).await.unwrap(), 1);
    let second = claim_job(&*pool, Duration::from_secs(5)).await.unwrap().unwrap();

    let err = extend_lease(&*pool, job.id, first.started_at.unwrap(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let current = get_job(&*pool, job.id).await.unwrap().unwrap();
    assert_eq!(current.lease_expires_at, second.lease_expires_at);

    extend_lease(&*pool, job.id, second.started_at.unwrap(), Duration::from_secs(60))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_enqueue_rejects_zero_attempts() {
    let pool = with_test_db().await;

    let result = enqueue_job(&*pool, &NewJob::new("email", Vec::new()).max_attempts(0)).await;
    assert!(matches!(result, Err(crate::error::StoreError::InvalidJob(_))));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires database to be running
async fn test_list_and_count_jobs() {
    let pool = with_test_db().await;

    for _ in 0..3 {
        enqueue_job(&*pool, &NewJob::new("email", Vec::new())).await.unwrap();
    }
    enqueue_job(&*pool, &NewJob::new("report", Vec::new())).await.unwrap();
    claim_job(&*pool, Duration::from_secs(30)).await.unwrap().unwrap();

    let emails = list_jobs(
        &*pool,
        &JobFilter {
            job_type: Some("email".to_string()),
            ..JobFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(emails.len(), 3);

    let processing = list_jobs(
        &*pool,
        &JobFilter {
            state: Some(JobState::Processing),
            ..JobFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(processing.len(), 1);

    let counts = count_jobs(&*pool).await.unwrap();
    assert_eq!(counts.pending, 3);
    assert_eq!(counts.processing, 1);
    assert_eq!(counts.total(), 4);
}
