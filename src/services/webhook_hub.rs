//! Webhook hub: long-lived subscriptions and availability fan-out.
//!
//! Subscribers are runner-side listeners that want to hear about every new
//! pending task. Delivery failures never affect subscription state; a dead
//! subscriber just keeps failing until it unregisters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskRepository;
use crate::services::webhook::{task_payload, WebhookNotifier, EVENT_AVAILABLE_TASKS};

/// Number of deliveries in flight at once during a fan-out.
const FANOUT_CONCURRENCY: usize = 10;

/// Per-request timeout during a fan-out.
const FANOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered webhook subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub url: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct WebhookHub {
    tasks: Arc<dyn TaskRepository>,
    notifier: WebhookNotifier,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    stopped: AtomicBool,
}

impl WebhookHub {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self {
            tasks,
            notifier: WebhookNotifier::new(),
            subscriptions: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a subscriber and send it the currently-available tasks once.
    pub async fn register(&self, url: impl Into<String>, device_id: impl Into<String>) -> Uuid {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            url: url.into(),
            device_id: device_id.into(),
            created_at: Utc::now(),
        };
        let id = subscription.id;

        {
            let mut subs = self.subscriptions.write().await;
            subs.insert(id, subscription.clone());
        }
        tracing::info!(webhook_id = %id, device_id = %subscription.device_id, "webhook registered");

        match self.available_tasks_payload().await {
            Ok(Some(payload)) => self.deliver_to(&subscription, &payload).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load available tasks for new subscriber"),
        }

        id
    }

    /// Remove a subscription. Returns false when the id was unknown.
    pub async fn unregister(&self, id: Uuid) -> bool {
        let removed = self.subscriptions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(webhook_id = %id, "webhook unregistered");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Fan the current available-task list out to every subscriber.
    ///
    /// Bounded concurrency; failures are logged per subscriber. A stop
    /// signal short-circuits further fan-outs.
    pub async fn notify_all(&self) -> DomainResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        let Some(payload) = self.available_tasks_payload().await? else {
            return Ok(());
        };

        let subscribers: Vec<Subscription> =
            self.subscriptions.read().await.values().cloned().collect();
        if subscribers.is_empty() {
            return Ok(());
        }

        tracing::debug!(subscribers = subscribers.len(), "fanning out available tasks");

        stream::iter(subscribers)
            .for_each_concurrent(FANOUT_CONCURRENCY, |subscription| {
                let payload = payload.clone();
                async move {
                    if self.stopped.load(Ordering::Acquire) {
                        return;
                    }
                    self.deliver_to(&subscription, &payload).await;
                }
            })
            .await;

        Ok(())
    }

    /// Stop accepting new fan-outs.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    async fn deliver_to(&self, subscription: &Subscription, payload: &Value) {
        if let Err(e) = self
            .notifier
            .deliver(
                &subscription.url,
                &subscription.device_id,
                EVENT_AVAILABLE_TASKS,
                payload,
                FANOUT_TIMEOUT,
            )
            .await
        {
            tracing::warn!(
                webhook_id = %subscription.id,
                url = %subscription.url,
                error = %e,
                "webhook delivery failed"
            );
        }
    }

    /// The pending-task list as a notification payload; None when empty.
    async fn available_tasks_payload(&self) -> DomainResult<Option<Value>> {
        let pending = self.tasks.list_by_status(TaskStatus::Pending).await?;
        if pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(Value::Array(pending.iter().map(task_payload).collect())))
    }
}
