mod helpers;

use std::sync::Arc;

use drover::adapters::ledger::NullLedger;
use drover::adapters::sqlite::{
    SqliteFederatedRepository, SqlitePromptRepository, SqliteReputationRepository,
    SqliteRunnerRepository, SqliteTaskRepository,
};
use drover::api::{router, AppState};
use drover::services::{
    Dispatcher, DispatcherConfig, FlCoordinator, PromptQueue, PromptQueueConfig, WebhookHub,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use helpers::database::setup_test_db;

/// Spin up the full route tree on an ephemeral port.
async fn spawn_server(pool: &SqlitePool) -> String {
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let runners = Arc::new(SqliteRunnerRepository::new(pool.clone()));
    let prompts = Arc::new(SqlitePromptRepository::new(pool.clone()));
    let federated_repo = Arc::new(SqliteFederatedRepository::new(pool.clone()));
    let reputation = Arc::new(SqliteReputationRepository::new(pool.clone()));

    let hub = Arc::new(WebhookHub::new(tasks.clone()));
    let dispatcher = Arc::new(
        Dispatcher::new(
            tasks.clone(),
            runners.clone(),
            reputation,
            Arc::new(NullLedger),
            DispatcherConfig::default(),
        )
        .with_hub(hub.clone()),
    );
    let prompt_queue = Arc::new(PromptQueue::new(
        prompts,
        runners.clone(),
        PromptQueueConfig::default(),
    ));
    let federated = Arc::new(FlCoordinator::new(
        federated_repo,
        runners.clone(),
        dispatcher.clone(),
    ));

    let state = AppState { dispatcher, hub, prompt_queue, federated, tasks, runners };
    let app = router(state, "/api");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });

    format!("http://{addr}/api")
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let pool = setup_test_db().await;
    let base = spawn_server(&pool).await;
    let client = reqwest::Client::new();

    // No runners yet: the task is created pending.
    let response = client
        .post(format!("{base}/tasks"))
        .json(&json!({"title": "T1", "type": "command", "config": {}}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 201);
    let task: Value = response.json().await.expect("json");
    assert_eq!(task["status"], "pending");
    let task_id = task["id"].as_str().expect("id").to_string();

    // Heartbeat registers R1.
    let response = client
        .post(format!("{base}/runners/heartbeat"))
        .json(&json!({"device_id": "R1", "status": "online"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 204);

    // Explicit assignment binds R1.
    let response = client
        .post(format!("{base}/tasks/{task_id}/assign"))
        .json(&json!({"device_id": "R1"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 204);

    // A second runner hits a conflict.
    client
        .post(format!("{base}/runners/heartbeat"))
        .json(&json!({"device_id": "R2"}))
        .send()
        .await
        .expect("request");
    let response = client
        .post(format!("{base}/tasks/{task_id}/assign"))
        .json(&json!({"device_id": "R2"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 409);

    // R1 reports its result.
    let response = client
        .post(format!("{base}/tasks/{task_id}/result"))
        .json(&json!({
            "device_id": "R1",
            "exit_code": 0,
            "resource_usage": {"cpu_seconds": 1.0}
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 204);

    let task: Value = client
        .get(format!("{base}/tasks/{task_id}"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(task["status"], "completed");

    let reward: Value = client
        .get(format!("{base}/tasks/{task_id}/reward"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert!(reward["reward"].as_f64().expect("reward") > 0.0);

    let result: Value = client
        .get(format!("{base}/tasks/{task_id}/result"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(result["device_id"], "R1");
}

#[tokio::test]
async fn validation_and_not_found_status_codes() {
    let pool = setup_test_db().await;
    let base = spawn_server(&pool).await;
    let client = reqwest::Client::new();

    // Unknown task type → 400.
    let response = client
        .post(format!("{base}/tasks"))
        .json(&json!({"title": "T", "type": "quantum"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    // Empty title → 400.
    let response = client
        .post(format!("{base}/tasks"))
        .json(&json!({"title": "", "type": "command"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    // Unknown task → 404.
    let response = client
        .get(format!("{base}/tasks/{}", uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);

    // Unknown runner → 404.
    let response = client
        .get(format!("{base}/runners/ghost"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn webhook_registration_over_http() {
    let pool = setup_test_db().await;
    let base = spawn_server(&pool).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/webhooks"))
        .json(&json!({"url": "http://runner.local/hook", "device_id": "R1"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("json");
    let webhook_id = body["webhook_id"].as_str().expect("id").to_string();

    let response = client
        .delete(format!("{base}/webhooks/{webhook_id}"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 204);

    let response = client
        .delete(format!("{base}/webhooks/{webhook_id}"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn federated_session_over_http() {
    let pool = setup_test_db().await;
    let base = spawn_server(&pool).await;
    let client = reqwest::Client::new();

    for device_id in ["R1", "R2"] {
        client
            .post(format!("{base}/runners/heartbeat"))
            .json(&json!({"device_id": device_id}))
            .send()
            .await
            .expect("request");
    }

    let response = client
        .post(format!("{base}/fl/sessions"))
        .json(&json!({
            "name": "mnist",
            "model_type": "cnn",
            "total_rounds": 1,
            "min_participants": 2
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 201);
    let session: Value = response.json().await.expect("json");
    let session_id = session["id"].as_str().expect("id").to_string();

    // Model is unavailable before any aggregation.
    let response = client
        .get(format!("{base}/fl/sessions/{session_id}/model"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 409);

    let response = client
        .post(format!("{base}/fl/sessions/{session_id}/start"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    for (runner, g, w) in [("R1", [1.0, 1.0], 100), ("R2", [3.0, 3.0], 300)] {
        let response = client
            .post(format!("{base}/fl/sessions/{session_id}/updates"))
            .json(&json!({
                "round_number": 1,
                "runner_id": runner,
                "gradients": {"L": g},
                "data_size": w,
                "loss": 0.5,
                "accuracy": 0.9
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
    }

    let model: Value = client
        .get(format!("{base}/fl/sessions/{session_id}/model"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(model["model_data"]["gradients"]["L"], json!([2.5, 2.5]));
    assert_eq!(model["status"], "completed");
}
