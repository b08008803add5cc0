mod helpers;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use drover::adapters::ledger::NullLedger;
use drover::adapters::sqlite::{
    SqliteReputationRepository, SqliteRunnerRepository, SqliteTaskRepository,
};
use drover::domain::errors::DomainError;
use drover::domain::models::{
    ResourceUsage, Runner, Task, TaskResult, TaskStatus, TaskType,
};
use drover::domain::ports::{ReputationRepository, RunnerRepository, TaskRepository};
use drover::services::{Dispatcher, DispatcherConfig};
use serde_json::json;
use sqlx::SqlitePool;

use helpers::database::{setup_test_db, teardown_test_db};

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    tasks: Arc<SqliteTaskRepository>,
    runners: Arc<SqliteRunnerRepository>,
    reputation: Arc<SqliteReputationRepository>,
}

fn fixture(pool: &SqlitePool) -> Fixture {
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let runners = Arc::new(SqliteRunnerRepository::new(pool.clone()));
    let reputation = Arc::new(SqliteReputationRepository::new(pool.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        tasks.clone(),
        runners.clone(),
        reputation.clone(),
        Arc::new(NullLedger),
        DispatcherConfig::default(),
    ));
    Fixture { dispatcher, tasks, runners, reputation }
}

async fn register_runner(runners: &SqliteRunnerRepository, device_id: &str) -> Runner {
    runners
        .upsert_on_heartbeat(&Runner::new(device_id))
        .await
        .expect("heartbeat should succeed")
        .runner
}

#[tokio::test]
async fn task_without_runners_stays_pending() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create should succeed");

    assert_eq!(created.status, TaskStatus::Pending);
    assert!(created.runner_id.is_empty());
    assert!(created.nonce.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn creation_assigns_to_an_idle_runner_immediately() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create should succeed");

    assert_eq!(created.status, TaskStatus::Running);
    assert_eq!(created.runner_id, "r1");
    assert!(!created.nonce.is_empty(), "nonce is assigned on dispatch");

    let runner = f.runners.get("r1").await.expect("get").expect("exists");
    assert_eq!(runner.task_id, Some(created.id));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn pending_sweep_pairs_waiting_task_with_new_runner() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create should succeed");
    assert_eq!(created.status, TaskStatus::Pending);

    register_runner(&f.runners, "r1").await;
    let assigned = f.dispatcher.run_pending_sweep().await.expect("sweep should succeed");
    assert_eq!(assigned, 1);

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.runner_id, "r1");
    assert_eq!(task.status, TaskStatus::Running);
    assert!(!task.nonce.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn pending_sweep_uses_each_runner_at_most_once() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    f.dispatcher.create_task(Task::new(TaskType::Command, "a")).await.expect("create");
    f.dispatcher.create_task(Task::new(TaskType::Command, "b")).await.expect("create");
    register_runner(&f.runners, "r1").await;

    let assigned = f.dispatcher.run_pending_sweep().await.expect("sweep");
    assert_eq!(assigned, 1, "one runner can take only one task per sweep");

    let pending = f.tasks.list_by_status(TaskStatus::Pending).await.expect("list");
    assert_eq!(pending.len(), 1);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn reassignment_to_the_same_runner_is_idempotent() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");
    assert_eq!(created.runner_id, "r1");

    // Second call observes the existing binding and reports success.
    f.dispatcher
        .assign_task(created.id, "r1")
        .await
        .expect("reassignment should be idempotent");

    let runner = f.runners.get("r1").await.expect("get").expect("exists");
    assert_eq!(runner.task_id, Some(created.id));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn concurrent_duplicate_assignments_collapse_to_one() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let task = Task::new(TaskType::Command, "T1");
    let task_id = task.id;
    f.tasks.create(&task).await.expect("insert");

    let (a, b) = tokio::join!(
        f.dispatcher.assign_task(task_id, "r1"),
        f.dispatcher.assign_task(task_id, "r1"),
    );
    assert!(a.is_ok(), "first call should succeed: {a:?}");
    assert!(b.is_ok(), "duplicate call should observe the guard: {b:?}");

    let stored = f.tasks.get(task_id).await.expect("get").expect("exists");
    assert_eq!(stored.runner_id, "r1");
    let runner = f.runners.get("r1").await.expect("get").expect("exists");
    assert_eq!(runner.task_id, Some(task_id));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn one_runner_never_owns_two_tasks() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let task_a = Task::new(TaskType::Command, "a");
    let task_b = Task::new(TaskType::Command, "b");
    let (id_a, id_b) = (task_a.id, task_b.id);
    f.tasks.create(&task_a).await.expect("insert");
    f.tasks.create(&task_b).await.expect("insert");

    let (ra, rb) = tokio::join!(
        f.dispatcher.assign_task(id_a, "r1"),
        f.dispatcher.assign_task(id_b, "r1"),
    );
    assert_ne!(
        ra.is_ok(),
        rb.is_ok(),
        "exactly one of the two bindings must win: {ra:?} / {rb:?}"
    );

    let a = f.tasks.get(id_a).await.expect("get").expect("exists");
    let b = f.tasks.get(id_b).await.expect("get").expect("exists");
    let bound: Vec<&Task> = [&a, &b].into_iter().filter(|t| !t.runner_id.is_empty()).collect();
    assert_eq!(bound.len(), 1, "exactly one task references the runner");
    assert_eq!(bound[0].status, TaskStatus::Running);

    let loser = if bound[0].id == a.id { &b } else { &a };
    assert_eq!(loser.status, TaskStatus::Pending, "losing binding was reverted");
    assert!(loser.runner_id.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn assignment_rejects_tasks_that_left_pending() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;
    register_runner(&f.runners, "r2").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");
    assert_eq!(created.status, TaskStatus::Running);

    // Already running under r1; r2 must be rejected.
    let err = f.dispatcher.assign_task(created.id, "r2").await.expect_err("should conflict");
    assert!(matches!(err, DomainError::Conflict(_)), "got {err:?}");

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn container_task_without_environment_is_rejected_at_assignment() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    // Bypass create-time validation by writing the row directly.
    let task = Task::new(TaskType::Container, "bad container")
        .with_config(json!({"image": "alpine"}));
    f.tasks.create(&task).await.expect("insert");

    let err = f.dispatcher.assign_task(task.id, "r1").await.expect_err("should reject");
    assert!(matches!(err, DomainError::ValidationFailed(_)), "got {err:?}");

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn save_result_completes_task_and_frees_runner() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");

    let mut result = TaskResult::new(created.id, "r1");
    result.exit_code = 0;
    result.resource_usage = ResourceUsage { cpu_seconds: 1.0, ..Default::default() };
    let saved = f.dispatcher.save_result(result).await.expect("save should succeed");

    // cpu_seconds = 1.0 at the default rate.
    assert!((saved.reward - 0.001).abs() < 1e-12);

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!((task.reward - saved.reward).abs() < f64::EPSILON);
    assert!(task.completed_at.is_some());
    assert_eq!(task.runner_id, "r1", "binding is preserved for audit");

    let runner = f.runners.get("r1").await.expect("get").expect("exists");
    assert!(runner.task_id.is_none());

    let stored = f.tasks.get_result(created.id).await.expect("get result").expect("exists");
    assert_eq!(stored.id, saved.id);

    let reputation = f.reputation.get("r1").await.expect("get").expect("exists");
    assert_eq!(reputation.tasks_completed, 1);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn save_result_for_unknown_task_fails() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    let result = TaskResult::new(uuid::Uuid::new_v4(), "r1");
    let err = f.dispatcher.save_result(result).await.expect_err("should fail");
    assert!(matches!(err, DomainError::TaskNotFound(_)));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn result_without_any_runner_identity_is_rejected() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    let task = Task::new(TaskType::Command, "unbound");
    f.tasks.create(&task).await.expect("insert");

    let result = TaskResult::new(task.id, "");
    let err = f.dispatcher.save_result(result).await.expect_err("should fail");
    assert!(matches!(err, DomainError::ValidationFailed(_)));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn nonce_mismatch_marks_task_not_verified() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");
    assert!(!created.nonce.is_empty());

    let mut result = TaskResult::new(created.id, "r1");
    result.nonce = "not-the-nonce".to_string();
    f.dispatcher.save_result(result).await.expect("save succeeds");

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.status, TaskStatus::NotVerified);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn matching_nonce_completes_the_task() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");

    let mut result = TaskResult::new(created.id, "r1");
    result.nonce = created.nonce.clone();
    f.dispatcher.save_result(result).await.expect("save succeeds");

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.status, TaskStatus::Completed);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn stall_sweep_reclaims_orphaned_task() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");
    assert_eq!(created.status, TaskStatus::Running);

    // The runner never responds; age the task past the stall timeout.
    let mut stale = created.clone();
    stale.updated_at = Utc::now() - ChronoDuration::minutes(6);
    f.tasks.update(&stale).await.expect("backdate");

    let reclaimed = f.dispatcher.run_stall_sweep().await.expect("sweep");
    assert_eq!(reclaimed, 1);

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.runner_id.is_empty());

    let runner = f.runners.get("r1").await.expect("get").expect("exists");
    assert_eq!(runner.status, drover::domain::models::RunnerStatus::Offline);
    assert!(runner.task_id.is_none());

    let reputation = f.reputation.get("r1").await.expect("get").expect("exists");
    assert_eq!(reputation.tasks_stalled, 1);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn fresh_running_tasks_survive_the_stall_sweep() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    let created = f
        .dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create");

    let reclaimed = f.dispatcher.run_stall_sweep().await.expect("sweep");
    assert_eq!(reclaimed, 0);

    let task = f.tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.runner_id, "r1");

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn backfill_reuses_a_freed_runner_on_the_oldest_pending_task() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);

    let mut older = Task::new(TaskType::Command, "older");
    older.created_at = Utc::now() - ChronoDuration::minutes(3);
    f.tasks.create(&older).await.expect("insert");
    let mut newer = Task::new(TaskType::Command, "newer");
    newer.created_at = Utc::now() - ChronoDuration::minutes(1);
    f.tasks.create(&newer).await.expect("insert");

    register_runner(&f.runners, "r1").await;
    f.dispatcher.backfill_from_runner("r1").await.expect("backfill");

    let stored = f.tasks.get(older.id).await.expect("get").expect("exists");
    assert_eq!(stored.runner_id, "r1", "oldest pending task wins the freed runner");
    let untouched = f.tasks.get(newer.id).await.expect("get").expect("exists");
    assert_eq!(untouched.status, TaskStatus::Pending);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn backfill_skips_busy_runners() {
    let pool = setup_test_db().await;
    let f = fixture(&pool);
    register_runner(&f.runners, "r1").await;

    f.dispatcher.create_task(Task::new(TaskType::Command, "bound")).await.expect("create");
    f.dispatcher.create_task(Task::new(TaskType::Command, "waiting")).await.expect("create");

    // r1 already owns "bound"; backfill must not touch "waiting".
    f.dispatcher.backfill_from_runner("r1").await.expect("backfill");

    let pending = f.tasks.list_by_status(TaskStatus::Pending).await.expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].title, "waiting");

    teardown_test_db(pool).await;
}
