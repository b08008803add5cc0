mod helpers;

use std::sync::Arc;

use drover::adapters::ledger::NullLedger;
use drover::adapters::sqlite::{
    SqliteReputationRepository, SqliteRunnerRepository, SqliteTaskRepository,
};
use drover::domain::models::{Runner, Task, TaskType};
use drover::domain::ports::{RunnerRepository, TaskRepository};
use drover::services::{Dispatcher, DispatcherConfig, WebhookHub};
use mockito::Matcher;
use serde_json::json;
use sqlx::SqlitePool;

use helpers::database::{setup_test_db, teardown_test_db};

fn dispatcher(pool: &SqlitePool) -> (Arc<Dispatcher>, Arc<SqliteTaskRepository>, Arc<SqliteRunnerRepository>) {
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let runners = Arc::new(SqliteRunnerRepository::new(pool.clone()));
    let reputation = Arc::new(SqliteReputationRepository::new(pool.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        tasks.clone(),
        runners.clone(),
        reputation,
        Arc::new(NullLedger),
        DispatcherConfig::default(),
    ));
    (dispatcher, tasks, runners)
}

#[tokio::test]
async fn dispatch_notification_carries_the_stored_nonce() {
    let pool = setup_test_db().await;
    let (dispatcher, tasks, runners) = dispatcher(&pool);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .match_header("content-type", "application/json")
        .match_header("x-device-id", "r1")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"type": "available_tasks"})),
            // The body must carry the 128-bit hex nonce assigned on dispatch.
            Matcher::Regex(r#""nonce":"[0-9a-f]{32}""#.to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let mut runner = Runner::new("r1");
    runner.webhook = format!("{}/hook", server.url());
    runners.upsert_on_heartbeat(&runner).await.expect("heartbeat");

    let created = dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create should succeed");

    mock.assert_async().await;

    let stored = tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(stored.nonce.len(), 32);
    assert!(stored.nonce.chars().all(|c| c.is_ascii_hexdigit()));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn failed_notification_keeps_the_binding() {
    let pool = setup_test_db().await;
    let (dispatcher, tasks, runners) = dispatcher(&pool);

    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/hook").with_status(500).create_async().await;

    let mut runner = Runner::new("r1");
    runner.webhook = format!("{}/hook", server.url());
    runners.upsert_on_heartbeat(&runner).await.expect("heartbeat");

    let created = dispatcher
        .create_task(Task::new(TaskType::Command, "T1"))
        .await
        .expect("create succeeds despite the failed delivery");

    mock.assert_async().await;

    // The binding survives; recovery is the stall sweep's job.
    let stored = tasks.get(created.id).await.expect("get").expect("exists");
    assert_eq!(stored.runner_id, "r1");
    let runner = runners.get("r1").await.expect("get").expect("exists");
    assert_eq!(runner.task_id, Some(created.id));

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn registration_sends_the_available_task_list_once() {
    let pool = setup_test_db().await;
    let tasks: Arc<SqliteTaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));

    tasks
        .create(&Task::new(TaskType::Command, "waiting"))
        .await
        .expect("insert");

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sub")
        .match_body(Matcher::PartialJson(json!({"type": "available_tasks"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let hub = WebhookHub::new(tasks);
    hub.register(format!("{}/sub", server.url()), "r1").await;
    assert_eq!(hub.subscriber_count().await, 1);

    mock.assert_async().await;

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn notify_all_fans_out_to_every_subscriber() {
    let pool = setup_test_db().await;
    let tasks: Arc<SqliteTaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));

    let mut server = mockito::Server::new_async().await;
    // One delivery at registration (pending list is empty, so none), plus
    // one per subscriber at notify_all.
    let sub_a = server.mock("POST", "/a").with_status(200).expect(1).create_async().await;
    let sub_b = server.mock("POST", "/b").with_status(200).expect(1).create_async().await;

    let hub = WebhookHub::new(tasks.clone());
    hub.register(format!("{}/a", server.url()), "ra").await;
    hub.register(format!("{}/b", server.url()), "rb").await;

    tasks
        .create(&Task::new(TaskType::Command, "waiting"))
        .await
        .expect("insert");

    hub.notify_all().await.expect("fan-out should succeed");

    sub_a.assert_async().await;
    sub_b.assert_async().await;

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn delivery_failure_keeps_the_subscription() {
    let pool = setup_test_db().await;
    let tasks: Arc<SqliteTaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));

    tasks
        .create(&Task::new(TaskType::Command, "waiting"))
        .await
        .expect("insert");

    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/dead", ).with_status(503).expect_at_least(1).create_async().await;

    let hub = WebhookHub::new(tasks);
    let id = hub.register(format!("{}/dead", server.url()), "r1").await;

    hub.notify_all().await.expect("fan-out tolerates failures");
    assert_eq!(hub.subscriber_count().await, 1);

    assert!(hub.unregister(id).await);
    assert_eq!(hub.subscriber_count().await, 0);
    assert!(!hub.unregister(id).await, "second unregister is a no-op");

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn stop_short_circuits_further_fanouts() {
    let pool = setup_test_db().await;
    let tasks: Arc<SqliteTaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));

    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/sub").with_status(200).expect(0).create_async().await;

    let hub = WebhookHub::new(tasks.clone());
    hub.register(format!("{}/sub", server.url()), "r1").await;

    tasks
        .create(&Task::new(TaskType::Command, "waiting"))
        .await
        .expect("insert");

    hub.stop();
    hub.notify_all().await.expect("stopped fan-out returns quietly");

    mock.assert_async().await;

    teardown_test_db(pool).await;
}
