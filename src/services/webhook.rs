//! Webhook delivery to runners.
//!
//! Every server → runner push uses the same protocol: POST to the runner's
//! registered URL with `Content-Type: application/json` and an
//! `X-Device-ID` header, body `{"type": <event>, "payload": <json>}`.
//! A non-200 answer is a delivery failure; the caller decides whether that
//! matters.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Task;

/// Event type for task availability notifications.
pub const EVENT_AVAILABLE_TASKS: &str = "available_tasks";

/// Event type for forwarded inference prompts.
pub const EVENT_PROMPT_REQUEST: &str = "prompt_request";

/// Thin reqwest wrapper enforcing the delivery protocol.
#[derive(Debug, Clone, Default)]
pub struct WebhookNotifier {
    http: Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }

    /// POST an event envelope to `url`, bounded by `timeout`.
    pub async fn deliver(
        &self,
        url: &str,
        device_id: &str,
        event: &str,
        payload: &Value,
        timeout: Duration,
    ) -> DomainResult<()> {
        let body = json!({ "type": event, "payload": payload });

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("X-Device-ID", device_id)
            .json(&body)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DomainError::DeliveryFailed(format!(
                "webhook {url} answered {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// The task fields a runner sees in an availability notification.
pub fn task_payload(task: &Task) -> Value {
    let mut payload = json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "type": task.task_type.as_str(),
        "config": task.config,
        "environment": task.environment,
        "nonce": task.nonce,
        "status": task.status.as_str(),
    });
    if let Some(completed_at) = task.completed_at {
        payload["completed_at"] = json!(completed_at);
    }
    payload
}
