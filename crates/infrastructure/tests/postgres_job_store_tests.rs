use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use taskworker_core::{JobStatus, JobStore};
use taskworker_errors::TaskWorkerError;
use taskworker_testing_utils::{epoch, payload, PostgresTestContainer};

#[tokio::test]
#[ignore = "需要Docker环境"]
async fn test_postgres_job_lifecycle() {
    let env = PostgresTestContainer::new().await.unwrap();
    let store = &env.store;

    let id = store
        .apply("mail.send_email", &payload(json!({"to": "a@x.com"})), epoch())
        .await
        .unwrap();
    assert!(store
        .claim_next(epoch() - Duration::milliseconds(1))
        .await
        .unwrap()
        .is_none());

    let job = store.claim_next(epoch()).await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.payload.get("to"), Some(&json!("a@x.com")));

    store.complete(&job, &json!({"ok": true})).await.unwrap();
    let err = store.complete(&job, &json!(null)).await.unwrap_err();
    assert!(matches!(err, TaskWorkerError::JobNotInFlight { .. }));

    let stored = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result, Some(json!({"ok": true})));
}

#[tokio::test]
#[ignore = "需要Docker环境"]
async fn test_postgres_concurrent_claims() {
    let env = PostgresTestContainer::new().await.unwrap();
    let store: Arc<dyn JobStore> = Arc::new(env.store.clone());

    for n in 0..30 {
        store.apply("t", &payload(json!({"n": n})), epoch()).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next(epoch()).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in futures::future::join_all(handles).await {
        all.extend(handle.unwrap());
    }
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
}

#[tokio::test]
#[ignore = "需要Docker环境"]
async fn test_postgres_requeue_stale() {
    let env = PostgresTestContainer::new().await.unwrap();
    let store = &env.store;

    let id = store.apply("t", &payload(json!({})), epoch()).await.unwrap();
    store.claim_next(epoch()).await.unwrap().unwrap();
    assert_eq!(store.requeue_stale(epoch()).await.unwrap(), 0);
    assert_eq!(store.requeue_stale(epoch() + Duration::seconds(1)).await.unwrap(), 1);

    let stored = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.claimed_at.is_none());
    assert_eq!(store.claim_next(epoch()).await.unwrap().unwrap().id, id);
}
