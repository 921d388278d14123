use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use runpack_hub::config::Config;
use runpack_hub::error::HubError;
use runpack_hub::freshness::{AlwaysFresh, ResultValidator};
use runpack_hub::lifecycle::{CheckOutcome, Coordinator, SubmitOutcome};
use runpack_hub::notifier::Notifier;
use runpack_hub::store::{JobStatus, JobStore};

/// Validator with a fixed verdict, standing in for the figpack probe.
struct FixedVerdict(bool);

#[async_trait]
impl ResultValidator for FixedVerdict {
    async fn is_fresh(&self, _output_data: &Value) -> bool {
        self.0
    }
}

async fn coordinator_with(validator: Arc<dyn ResultValidator>) -> Coordinator {
    let store = JobStore::open_in_memory().await.unwrap();
    Coordinator::new(store, validator, Notifier::disabled(), Config::default())
}

async fn coordinator() -> Coordinator {
    coordinator_with(Arc::new(AlwaysFresh)).await
}

fn created(outcome: SubmitOutcome) -> runpack_hub::store::Job {
    match outcome {
        SubmitOutcome::Created(job) => job,
        other => panic!("expected Created, got {other:?}"),
    }
}

#[tokio::test]
async fn test_submit_dedups_on_key_order() {
    let coordinator = coordinator().await;

    let job = created(
        coordinator
            .submit("T", &json!({ "a": 1, "b": 2 }))
            .await
            .unwrap(),
    );
    assert_eq!(job.status, JobStatus::Pending);

    match coordinator
        .submit("T", &json!({ "b": 2, "a": 1 }))
        .await
        .unwrap()
    {
        SubmitOutcome::Existing(existing) => {
            assert_eq!(existing.id, job.id);
            assert_eq!(existing.status, JobStatus::Pending);
        }
        other => panic!("expected Existing, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_submits_create_one_row() {
    let coordinator = Arc::new(coordinator().await);
    let params = json!({ "a": 1 });

    let (left, right) = tokio::join!(
        coordinator.submit("T", &params),
        coordinator.submit("T", &params),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    let creations = [&left, &right]
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::Created(_)))
        .count();
    assert_eq!(creations, 1);

    let id_of = |outcome: &SubmitOutcome| match outcome {
        SubmitOutcome::Created(job) | SubmitOutcome::Existing(job) => job.id.clone(),
        SubmitOutcome::Expired { .. } => panic!("no freshness involved here"),
    };
    assert_eq!(id_of(&left), id_of(&right));
}

#[tokio::test]
async fn test_check_never_creates() {
    let coordinator = coordinator().await;
    let params = json!({ "a": 1 });

    assert!(matches!(
        coordinator.check("T", &params).await.unwrap(),
        CheckOutcome::Missing
    ));
    // Still nothing exists.
    assert!(matches!(
        coordinator.check("T", &params).await.unwrap(),
        CheckOutcome::Missing
    ));

    let job = created(coordinator.submit("T", &params).await.unwrap());
    match coordinator.check("T", &params).await.unwrap() {
        CheckOutcome::Present(found) => assert_eq!(found.id, job.id),
        other => panic!("expected Present, got {other:?}"),
    }
}

#[tokio::test]
async fn test_happy_path_through_completion() {
    let coordinator = coordinator().await;
    let params = json!({ "a": 1, "b": 2 });

    let job = created(coordinator.submit("T", &params).await.unwrap());
    let runner = coordinator
        .register_runner(None, "worker-1", &["T".to_string()])
        .await
        .unwrap();

    let available = coordinator
        .available_jobs(&runner.id, &[], 10)
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, job.id);

    let claimed = coordinator.claim(&job.id, &runner.id).await.unwrap();
    assert_eq!(claimed.status, JobStatus::Claimed);
    assert_eq!(claimed.claimed_by.as_deref(), Some(runner.id.as_str()));

    let beating = coordinator
        .heartbeat(&job.id, &runner.id, Some(1), Some(2), Some("half"))
        .await
        .unwrap();
    assert_eq!(beating.status, JobStatus::InProgress);
    assert_eq!(beating.progress_current, Some(1));

    let completed = coordinator
        .complete(&job.id, &runner.id, &json!({ "ok": true }), Some("done"))
        .await
        .unwrap();
    assert_eq!(completed.status, JobStatus::Completed);

    // A later submit of the same params serves the cached result.
    match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Existing(cached) => {
            assert_eq!(cached.id, job.id);
            assert_eq!(cached.status, JobStatus::Completed);
            assert_eq!(cached.output_data_value().unwrap(), json!({ "ok": true }));
        }
        other => panic!("expected cached result, got {other:?}"),
    }

    // The claimed job is no longer available to other runners.
    let available = coordinator
        .available_jobs(&runner.id, &[], 10)
        .await
        .unwrap();
    assert!(available.is_empty());
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let coordinator = Arc::new(coordinator().await);
    let job = created(coordinator.submit("T", &json!({})).await.unwrap());

    for runner in ["r1", "r2"] {
        coordinator
            .register_runner(Some(runner.to_string()), runner, &["T".to_string()])
            .await
            .unwrap();
    }

    let (left, right) = tokio::join!(
        coordinator.claim(&job.id, "r1"),
        coordinator.claim(&job.id, "r2"),
    );

    let winners = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let loser = if left.is_ok() { right } else { left };
    assert!(matches!(loser, Err(HubError::Conflict(_))));

    let job = coordinator.get_job(&job.id).await.unwrap();
    assert!(matches!(job.claimed_by.as_deref(), Some("r1") | Some("r2")));
}

#[tokio::test]
async fn test_wrong_runner_heartbeat_rejected() {
    let coordinator = coordinator().await;
    let job = created(coordinator.submit("T", &json!({})).await.unwrap());
    for runner in ["r1", "r2"] {
        coordinator
            .register_runner(Some(runner.to_string()), runner, &["T".to_string()])
            .await
            .unwrap();
    }

    coordinator.claim(&job.id, "r1").await.unwrap();

    let err = coordinator
        .heartbeat(&job.id, "r2", Some(1), Some(2), None)
        .await
        .unwrap_err();
    match err {
        HubError::Validation(msg) => assert!(msg.contains("not claimed by this runner")),
        other => panic!("expected Validation, got {other:?}"),
    }

    // State unchanged: still claimed by r1.
    let job = coordinator.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.claimed_by.as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_terminal_state_is_immutable() {
    let coordinator = coordinator().await;
    let job = created(coordinator.submit("T", &json!({})).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();

    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .fail(&job.id, "r1", "boom", None)
        .await
        .unwrap();

    // Every further transition from the same runner is a 400-class error.
    assert!(matches!(
        coordinator.heartbeat(&job.id, "r1", None, None, None).await,
        Err(HubError::Validation(_))
    ));
    assert!(matches!(
        coordinator.complete(&job.id, "r1", &json!({}), None).await,
        Err(HubError::Validation(_))
    ));
    assert!(matches!(
        coordinator.fail(&job.id, "r1", "again", None).await,
        Err(HubError::Validation(_))
    ));

    let job = coordinator.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("boom"));

    // A failed job is returned as-is on re-submission, never retried.
    match coordinator.submit("T", &json!({})).await.unwrap() {
        SubmitOutcome::Existing(stored) => {
            assert_eq!(stored.status, JobStatus::Failed);
            assert_eq!(stored.error_message.as_deref(), Some("boom"));
        }
        other => panic!("expected stored failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_cached_result_expires_and_is_deleted() {
    let coordinator = coordinator_with(Arc::new(FixedVerdict(false))).await;
    let params = json!({ "fig": 1 });

    let job = created(coordinator.submit("T", &params).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .complete(
            &job.id,
            "r1",
            &json!({ "fig": { "figpack_url": "https://x/a/index.html" } }),
            None,
        )
        .await
        .unwrap();

    match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Expired { job_id } => assert_eq!(job_id, job.id),
        other => panic!("expected Expired, got {other:?}"),
    }

    // The row is gone; a fresh submit recreates the job from scratch.
    assert!(matches!(
        coordinator.get_job(&job.id).await,
        Err(HubError::NotFound(_))
    ));
    let recreated = created(coordinator.submit("T", &params).await.unwrap());
    assert_ne!(recreated.id, job.id);
    assert_eq!(recreated.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_check_reports_expiry_too() {
    let coordinator = coordinator_with(Arc::new(FixedVerdict(false))).await;
    let params = json!({ "x": 1 });

    let job = created(coordinator.submit("T", &params).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .complete(&job.id, "r1", &json!({ "ok": 1 }), None)
        .await
        .unwrap();

    match coordinator.check("T", &params).await.unwrap() {
        CheckOutcome::Expired { job_id } => assert_eq!(job_id, job.id),
        other => panic!("expected Expired, got {other:?}"),
    }
    assert!(matches!(
        coordinator.check("T", &params).await.unwrap(),
        CheckOutcome::Missing
    ));
}

#[tokio::test]
async fn test_fresh_cached_result_survives_probing() {
    // AlwaysFresh keeps completed rows servable; FixedVerdict(true) is the
    // same through the trait object.
    let coordinator = coordinator_with(Arc::new(FixedVerdict(true))).await;
    let params = json!({ "x": 1 });

    let job = created(coordinator.submit("T", &params).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .complete(&job.id, "r1", &json!({ "ok": 1 }), None)
        .await
        .unwrap();

    assert!(matches!(
        coordinator.submit("T", &params).await.unwrap(),
        SubmitOutcome::Existing(_)
    ));
    assert!(coordinator.get_job(&job.id).await.is_ok());
}

#[tokio::test]
async fn test_available_jobs_respects_capabilities() {
    let coordinator = coordinator().await;
    created(coordinator.submit("alpha", &json!({ "n": 1 })).await.unwrap());
    created(coordinator.submit("beta", &json!({ "n": 2 })).await.unwrap());
    created(coordinator.submit("gamma", &json!({ "n": 3 })).await.unwrap());

    let runner = coordinator
        .register_runner(None, "w", &["alpha".to_string(), "beta".to_string()])
        .await
        .unwrap();

    // No explicit filter: everything the runner declared.
    let jobs = coordinator
        .available_jobs(&runner.id, &[], 10)
        .await
        .unwrap();
    let mut types: Vec<&str> = jobs.iter().map(|j| j.job_type.as_str()).collect();
    types.sort();
    assert_eq!(types, vec!["alpha", "beta"]);

    // Requested types are intersected with capabilities.
    let jobs = coordinator
        .available_jobs(&runner.id, &["beta".to_string(), "gamma".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "beta");

    // Unknown runner cannot poll.
    assert!(matches!(
        coordinator.available_jobs("ghost", &[], 10).await,
        Err(HubError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_stats_counts_by_status_and_runner_activity() {
    let coordinator = coordinator().await;
    created(coordinator.submit("T", &json!({ "n": 1 })).await.unwrap());
    let job = created(coordinator.submit("T", &json!({ "n": 2 })).await.unwrap());

    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.jobs.pending, 1);
    assert_eq!(stats.jobs.claimed, 1);
    assert_eq!(stats.jobs.total, 2);
    assert_eq!(stats.runners.total, 1);
    assert_eq!(stats.runners.active, 1);
}

#[tokio::test]
async fn test_sweeper_fails_stale_jobs() {
    use runpack_hub::lifecycle::sweeper::run_sweeper;
    use runpack_hub::store::HEARTBEAT_TIMEOUT_ERROR;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    let store = JobStore::open_in_memory().await.unwrap();
    let coordinator = Coordinator::new(
        store.clone(),
        Arc::new(AlwaysFresh),
        Notifier::disabled(),
        Config::default(),
    );

    let job = created(coordinator.submit("T", &json!({})).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();

    // Let the heartbeat go stale, then run the sweeper loop briefly.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(run_sweeper(
        store,
        Duration::from_millis(10),
        Duration::from_millis(5),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    handle.await.unwrap();

    let job = coordinator.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(HEARTBEAT_TIMEOUT_ERROR));

    // The sweep is terminal: late runner reports are refused.
    assert!(matches!(
        coordinator.heartbeat(&job.id, "r1", None, None, None).await,
        Err(HubError::Validation(_))
    ));
}

#[tokio::test]
async fn test_oversized_payloads_rejected() {
    let coordinator = coordinator().await;
    let limits = coordinator.config().limits;

    let big = "x".repeat(limits.max_input_bytes + 1);
    assert!(matches!(
        coordinator.submit("T", &json!({ "p": big })).await,
        Err(HubError::Validation(_))
    ));

    // Oversized output from a runner.
    let job = created(coordinator.submit("T", &json!({})).await.unwrap());
    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();

    let big = "x".repeat(limits.max_output_bytes + 1);
    assert!(matches!(
        coordinator
            .complete(&job.id, "r1", &json!({ "out": big }), None)
            .await,
        Err(HubError::Validation(_))
    ));

    // The job is still live after the rejected completion.
    let job = coordinator.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
}
