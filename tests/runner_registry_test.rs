mod helpers;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use drover::adapters::sqlite::SqliteRunnerRepository;
use drover::domain::models::{ModelCapability, Runner, RunnerStatus};
use drover::domain::ports::RunnerRepository;
use uuid::Uuid;

use helpers::database::{setup_test_db, teardown_test_db};

fn online_runner(device_id: &str) -> Runner {
    let mut runner = Runner::new(device_id);
    runner.wallet_address = format!("0x{device_id}");
    runner.webhook = format!("http://{device_id}.local/hook");
    runner
}

#[tokio::test]
async fn first_heartbeat_creates_the_runner() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    let outcome = repo
        .upsert_on_heartbeat(&online_runner("r1"))
        .await
        .expect("heartbeat should succeed");

    assert!(!outcome.became_available);
    assert_eq!(outcome.runner.status, RunnerStatus::Online);

    let stored = repo.get("r1").await.expect("get should succeed").expect("runner exists");
    assert_eq!(stored.device_id, "r1");
    assert_eq!(stored.wallet_address, "0xr1");
    assert!(stored.task_id.is_none());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn heartbeat_preserves_task_binding() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    repo.upsert_on_heartbeat(&online_runner("r1")).await.expect("heartbeat");
    let task_id = Uuid::new_v4();
    assert!(repo.try_claim("r1", task_id).await.expect("claim"));

    // A heartbeat never steals the binding.
    let outcome = repo.upsert_on_heartbeat(&online_runner("r1")).await.expect("heartbeat");
    assert_eq!(outcome.runner.task_id, Some(task_id));

    let stored = repo.get("r1").await.expect("get").expect("exists");
    assert_eq!(stored.task_id, Some(task_id));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn offline_to_online_signals_became_available() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    let mut runner = online_runner("r1");
    runner.status = RunnerStatus::Offline;
    let outcome = repo.upsert_on_heartbeat(&runner).await.expect("heartbeat");
    assert!(!outcome.became_available);

    runner.status = RunnerStatus::Online;
    let outcome = repo.upsert_on_heartbeat(&runner).await.expect("heartbeat");
    assert!(outcome.became_available);

    // Online → online is not an edge.
    let outcome = repo.upsert_on_heartbeat(&runner).await.expect("heartbeat");
    assert!(!outcome.became_available);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn update_unknown_runner_fails() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    let runner = online_runner("ghost");
    assert!(repo.update(&runner).await.is_err());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn try_claim_admits_exactly_one_task() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    repo.upsert_on_heartbeat(&online_runner("r1")).await.expect("heartbeat");

    assert!(repo.try_claim("r1", Uuid::new_v4()).await.expect("claim"));
    assert!(!repo.try_claim("r1", Uuid::new_v4()).await.expect("claim"));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn sweep_offline_marks_silent_runners() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    repo.upsert_on_heartbeat(&online_runner("stale")).await.expect("heartbeat");
    repo.upsert_on_heartbeat(&online_runner("fresh")).await.expect("heartbeat");
    assert!(repo.try_claim("stale", Uuid::new_v4()).await.expect("claim"));

    // Backdate the stale runner past the timeout.
    let old = (Utc::now() - ChronoDuration::minutes(10)).to_rfc3339();
    sqlx::query("UPDATE runners SET last_heartbeat = ? WHERE device_id = 'stale'")
        .bind(&old)
        .execute(&pool)
        .await
        .expect("backdate");

    let affected = repo
        .sweep_offline(Duration::from_secs(300))
        .await
        .expect("sweep should succeed");
    assert_eq!(affected, vec!["stale".to_string()]);

    let stale = repo.get("stale").await.expect("get").expect("exists");
    assert_eq!(stale.status, RunnerStatus::Offline);
    assert!(stale.task_id.is_none());

    let fresh = repo.get("fresh").await.expect("get").expect("exists");
    assert_eq!(fresh.status, RunnerStatus::Online);

    // A second sweep finds nothing; the transition already happened.
    let affected = repo.sweep_offline(Duration::from_secs(300)).await.expect("sweep");
    assert!(affected.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn capabilities_round_trip_on_heartbeat() {
    let pool = setup_test_db().await;
    let repo = SqliteRunnerRepository::new(pool.clone());

    let mut runner = online_runner("r1");
    runner.capabilities = vec![ModelCapability {
        model_name: "qwen3".to_string(),
        is_loaded: true,
        max_tokens: 8192,
        loaded_at: None,
    }];
    repo.upsert_on_heartbeat(&runner).await.expect("heartbeat");

    let online = repo
        .list_online_with_capabilities()
        .await
        .expect("list should succeed");
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].capabilities.len(), 1);
    assert!(online[0].capabilities[0].is_loaded);

    // The next heartbeat replaces the capability set wholesale.
    runner.capabilities = vec![];
    repo.upsert_on_heartbeat(&runner).await.expect("heartbeat");
    let online = repo.list_online_with_capabilities().await.expect("list");
    assert!(online[0].capabilities.is_empty());

    teardown_test_db(pool).await;
}
