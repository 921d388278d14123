use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use runpack_hub::config::Config;
use runpack_hub::freshness::{FigpackProbe, ResultValidator};
use runpack_hub::identity::now_ms;
use runpack_hub::lifecycle::{Coordinator, SubmitOutcome};
use runpack_hub::notifier::Notifier;
use runpack_hub::store::{Job, JobStatus, JobStore};

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Figure manifests in every state the probe distinguishes.
fn manifest_app() -> Router {
    Router::new()
        .route(
            "/pinned/figpack.json",
            get(|| async { Json(json!({ "pinned": true })) }),
        )
        .route(
            "/live/figpack.json",
            get(|| async { Json(json!({ "expiration": now_ms() as f64 + 3_600_000.0 })) }),
        )
        .route(
            "/deleted/figpack.json",
            get(|| async { Json(json!({ "deleted": true, "pinned": true })) }),
        )
        .route(
            "/expired/figpack.json",
            get(|| async { Json(json!({ "expiration": 1 })) }),
        )
        .route("/garbage/figpack.json", get(|| async { "not json" }))
}

fn figpack_output(addr: SocketAddr, names: &[&str]) -> Value {
    let figures: Vec<Value> = names
        .iter()
        .map(|name| json!({ "figpack_url": format!("http://{addr}/{name}/index.html") }))
        .collect();
    json!({ "figures": figures })
}

fn probe() -> FigpackProbe {
    FigpackProbe::new(Duration::from_secs(2))
}

#[tokio::test]
async fn test_probe_accepts_pinned_and_unexpired() {
    let addr = spawn_server(manifest_app()).await;
    assert!(probe()
        .is_fresh(&figpack_output(addr, &["pinned", "live"]))
        .await);
}

#[tokio::test]
async fn test_probe_rejects_dead_manifests() {
    let addr = spawn_server(manifest_app()).await;
    let probe = probe();

    // Deleted beats pinned.
    assert!(!probe.is_fresh(&figpack_output(addr, &["deleted"])).await);
    // Past expiration without a pin.
    assert!(!probe.is_fresh(&figpack_output(addr, &["expired"])).await);
    // One dead figure spoils an otherwise live result.
    assert!(
        !probe
            .is_fresh(&figpack_output(addr, &["pinned", "expired"]))
            .await
    );
    // 404 and unparseable bodies count as dead.
    assert!(!probe.is_fresh(&figpack_output(addr, &["missing"])).await);
    assert!(!probe.is_fresh(&figpack_output(addr, &["garbage"])).await);
}

#[tokio::test]
async fn test_probe_without_urls_is_always_fresh() {
    // No server involved: zero figpack URLs means nothing can go stale.
    assert!(probe().is_fresh(&json!({ "ok": true })).await);
    assert!(probe().is_fresh(&json!(null)).await);
}

#[tokio::test]
async fn test_probe_rejects_malformed_urls() {
    // The URL does not end with /index.html, so no manifest can be derived.
    let output = json!({ "figpack_url": "https://x/a/viewer.html" });
    assert!(!probe().is_fresh(&output).await);
}

#[tokio::test]
async fn test_unreachable_host_counts_as_stale() {
    let output = json!({ "figpack_url": "http://127.0.0.1:1/gone/index.html" });
    assert!(!probe().is_fresh(&output).await);
}

/// Scenario: a completed job whose figure was deleted from cloud storage is
/// expired and removed on the next submission, end to end over real HTTP.
#[tokio::test]
async fn test_deleted_figure_expires_cached_job() {
    let addr = spawn_server(manifest_app()).await;

    let store = JobStore::open_in_memory().await.unwrap();
    let coordinator = Coordinator::new(
        store,
        Arc::new(probe()),
        Notifier::disabled(),
        Config::default(),
    );

    let params = json!({ "recording": "r1" });
    let job = match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Created(job) => job,
        other => panic!("expected Created, got {other:?}"),
    };

    coordinator
        .register_runner(Some("r1".to_string()), "r1", &["T".to_string()])
        .await
        .unwrap();
    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .complete(&job.id, "r1", &figpack_output(addr, &["deleted"]), None)
        .await
        .unwrap();

    match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Expired { job_id } => assert_eq!(job_id, job.id),
        other => panic!("expected Expired, got {other:?}"),
    }
    assert!(coordinator.get_job(&job.id).await.is_err());

    // A still-pinned figure keeps the cache servable.
    let params = json!({ "recording": "r2" });
    let job = match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Created(job) => job,
        other => panic!("expected Created, got {other:?}"),
    };
    coordinator.claim(&job.id, "r1").await.unwrap();
    coordinator
        .complete(&job.id, "r1", &figpack_output(addr, &["pinned"]), None)
        .await
        .unwrap();

    match coordinator.submit("T", &params).await.unwrap() {
        SubmitOutcome::Existing(cached) => assert_eq!(cached.status, JobStatus::Completed),
        other => panic!("expected cached result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_notifier_publishes_new_job_event() {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    let app = Router::new().route(
        "/publish",
        post(move |Json(event): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
                Json(json!({ "ok": true }))
            }
        }),
    );
    let addr = spawn_server(app).await;

    let config = Config {
        notify_url: Some(format!("http://{addr}/publish")),
        notify_key: Some("publish-key".to_string()),
        ..Config::default()
    };
    let notifier = Notifier::from_config(&config);

    let job = Job {
        id: "job-1".to_string(),
        job_hash: "hash-1".to_string(),
        job_type: "T".to_string(),
        input_params: "{}".to_string(),
        status: JobStatus::Pending,
        created_at: now_ms(),
        updated_at: now_ms(),
        claimed_by: None,
        claimed_at: None,
        progress_current: None,
        progress_total: None,
        console_output: None,
        output_data: None,
        error_message: None,
        last_heartbeat: None,
    };
    notifier.notify_new_job(&job);

    // The POST runs on a detached task; poll until it lands.
    let mut event = None;
    for _ in 0..100 {
        if let Some(first) = received.lock().unwrap().first().cloned() {
            event = Some(first);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let event = event.expect("notification never arrived");

    assert_eq!(event["type"], "new_job");
    assert_eq!(event["job_id"], "job-1");
    assert_eq!(event["job_hash"], "hash-1");
    assert_eq!(event["job_type"], "T");
    assert!(event["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_disabled_notifier_is_inert() {
    // No relay configured: nothing to assert beyond "does not panic".
    let notifier = Notifier::disabled();
    let job = Job {
        id: "job-1".to_string(),
        job_hash: "h".to_string(),
        job_type: "T".to_string(),
        input_params: "{}".to_string(),
        status: JobStatus::Pending,
        created_at: now_ms(),
        updated_at: now_ms(),
        claimed_by: None,
        claimed_at: None,
        progress_current: None,
        progress_total: None,
        console_output: None,
        output_data: None,
        error_message: None,
        last_heartbeat: None,
    };
    notifier.notify_new_job(&job);
}
