//! Inference prompt dispatch with queuing.
//!
//! A prompt goes straight to a runner whose loaded models match the request;
//! otherwise it waits in an in-memory retry queue that a single processor
//! drains every tick. The database row is authoritative: the queue entry is
//! dropped whenever the row has moved on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::interval;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BillingMetrics, PromptRequest, PromptStatus, QueuedPrompt, Runner, RunnerStatus,
};
use crate::domain::ports::{PromptRepository, RunnerRepository};
use crate::services::webhook::{WebhookNotifier, EVENT_PROMPT_REQUEST};

/// Bound on a single prompt forward attempt.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for the prompt queue processor.
#[derive(Debug, Clone)]
pub struct PromptQueueConfig {
    /// Interval between queue processing ticks.
    pub tick_interval: Duration,
}

impl Default for PromptQueueConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(10) }
    }
}

pub struct PromptQueue {
    prompts: Arc<dyn PromptRepository>,
    runners: Arc<dyn RunnerRepository>,
    notifier: WebhookNotifier,
    config: PromptQueueConfig,
    queue: Mutex<Vec<QueuedPrompt>>,
    stop_flag: Arc<AtomicBool>,
    running: AtomicBool,
}

impl PromptQueue {
    pub fn new(
        prompts: Arc<dyn PromptRepository>,
        runners: Arc<dyn RunnerRepository>,
        config: PromptQueueConfig,
    ) -> Self {
        Self {
            prompts,
            runners,
            notifier: WebhookNotifier::new(),
            config,
            queue: Mutex::new(Vec::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Submit a prompt. Dispatches immediately when a capable runner is
    /// available, otherwise queues for the processor.
    pub async fn submit(
        &self,
        client_id: impl Into<String>,
        prompt_text: impl Into<String>,
        model: impl Into<String>,
    ) -> DomainResult<PromptRequest> {
        let mut prompt = PromptRequest::new(client_id, prompt_text, model);

        if let Some(runner) = self.claim_capable_runner(&prompt.model_name, prompt.id).await? {
            prompt.status = PromptStatus::Processing;
            prompt.runner_id = runner.device_id.clone();
            self.prompts.create(&prompt).await?;
            tracing::info!(prompt_id = %prompt.id, device_id = %runner.device_id, "prompt dispatched");

            if let Err(e) = self.forward(&mut prompt, &runner).await {
                tracing::warn!(prompt_id = %prompt.id, error = %e, "prompt forward failed");
            }
            return Ok(prompt);
        }

        self.prompts.create(&prompt).await?;
        {
            let mut queue = self.queue.lock().await;
            queue.push(QueuedPrompt::new(prompt.id, prompt.model_name.clone()));
        }
        tracing::info!(prompt_id = %prompt.id, model = %prompt.model_name, "no capable runner, prompt queued");

        Ok(prompt)
    }

    /// Record a completed inference: response, terminal status, unbind, and
    /// billing metrics.
    pub async fn complete(
        &self,
        prompt_id: Uuid,
        response: impl Into<String>,
        prompt_tokens: i64,
        response_tokens: i64,
        inference_time_ms: i64,
    ) -> DomainResult<PromptRequest> {
        let mut prompt = self
            .prompts
            .get(prompt_id)
            .await?
            .ok_or(DomainError::PromptNotFound(prompt_id))?;

        if prompt.status == PromptStatus::Completed {
            return Err(DomainError::Conflict(format!("prompt {prompt_id} already completed")));
        }

        prompt.response = response.into();
        prompt.status = PromptStatus::Completed;
        prompt.completed_at = Some(Utc::now());
        prompt.updated_at = Utc::now();
        self.prompts.update(&prompt).await?;

        if !prompt.runner_id.is_empty() {
            self.unbind(&prompt.runner_id).await;
        }

        let metrics = BillingMetrics::new(
            prompt.id,
            prompt.client_id.clone(),
            prompt_tokens,
            response_tokens,
            inference_time_ms,
        );
        self.prompts.save_billing(&metrics).await?;
        tracing::info!(
            prompt_id = %prompt.id,
            total_tokens = metrics.total_tokens,
            inference_time_ms,
            "prompt completed and billed"
        );

        Ok(prompt)
    }

    /// Fetch a prompt row.
    pub async fn get(&self, id: Uuid) -> DomainResult<Option<PromptRequest>> {
        self.prompts.get(id).await
    }

    /// One processor tick; public for tests.
    pub async fn process_queue(&self) -> DomainResult<()> {
        let entries: Vec<QueuedPrompt> = {
            let mut queue = self.queue.lock().await;
            std::mem::take(&mut *queue)
        };
        if entries.is_empty() {
            return Ok(());
        }

        let mut survivors = Vec::new();

        for mut entry in entries {
            // The row is authoritative; drop entries whose prompt moved on.
            let Some(mut prompt) = self.prompts.get(entry.prompt_id).await? else {
                continue;
            };
            if prompt.status != PromptStatus::Queued {
                continue;
            }

            match self.claim_capable_runner(&entry.model_name, prompt.id).await? {
                Some(runner) => {
                    prompt.status = PromptStatus::Processing;
                    prompt.runner_id = runner.device_id.clone();
                    prompt.updated_at = Utc::now();
                    self.prompts.update(&prompt).await?;
                    tracing::info!(prompt_id = %prompt.id, device_id = %runner.device_id, "queued prompt dispatched");

                    if let Err(e) = self.forward(&mut prompt, &runner).await {
                        tracing::warn!(prompt_id = %prompt.id, error = %e, "queued prompt forward failed");
                    }
                }
                None => {
                    entry.retry_count += 1;
                    if entry.retries_exhausted() {
                        tracing::warn!(prompt_id = %prompt.id, retries = entry.retry_count, "prompt retries exhausted");
                        prompt.status = PromptStatus::Failed;
                        prompt.updated_at = Utc::now();
                        self.prompts.update(&prompt).await?;
                    } else {
                        survivors.push(entry);
                    }
                }
            }
        }

        if !survivors.is_empty() {
            let mut queue = self.queue.lock().await;
            // Entries submitted during processing keep their place behind
            // the survivors.
            let newcomers = std::mem::take(&mut *queue);
            *queue = survivors;
            queue.extend(newcomers);
        }

        Ok(())
    }

    /// Start the processor loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("prompt queue processor already running");
            return;
        }
        self.stop_flag.store(false, Ordering::Release);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                tick_s = queue.config.tick_interval.as_secs(),
                "prompt queue processor started"
            );
            let mut ticker = interval(queue.config.tick_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if queue.stop_flag.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = queue.process_queue().await {
                    tracing::error!(error = %e, "prompt queue tick failed");
                }
            }
            queue.running.store(false, Ordering::Release);
            tracing::info!("prompt queue processor stopped");
        });
    }

    /// Request the processor to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Find an idle online runner with a loaded model matching `model` and
    /// atomically bind it to the prompt. Returns None when no capable runner
    /// is free (including losing a binding race).
    async fn claim_capable_runner(
        &self,
        model: &str,
        prompt_id: Uuid,
    ) -> DomainResult<Option<Runner>> {
        let runners = self.runners.list_online_with_capabilities().await?;
        for runner in runners {
            if !runner.is_available() || runner.loaded_capability_for(model).is_none() {
                continue;
            }
            if self.runners.try_claim(&runner.device_id, prompt_id).await? {
                return Ok(Some(runner));
            }
        }
        Ok(None)
    }

    /// Deliver the prompt to its bound runner. Any failure marks the prompt
    /// failed and unbinds the runner.
    async fn forward(&self, prompt: &mut PromptRequest, runner: &Runner) -> DomainResult<()> {
        let payload = json!({
            "id": prompt.id,
            "client_id": prompt.client_id,
            "prompt": prompt.prompt,
            "model": prompt.model_name,
        });

        let delivery = if runner.webhook.is_empty() {
            Err(DomainError::DeliveryFailed(format!(
                "runner {} has no webhook",
                runner.device_id
            )))
        } else {
            self.notifier
                .deliver(
                    &runner.webhook,
                    &runner.device_id,
                    EVENT_PROMPT_REQUEST,
                    &payload,
                    FORWARD_TIMEOUT,
                )
                .await
        };

        if let Err(e) = delivery {
            prompt.status = PromptStatus::Failed;
            prompt.updated_at = Utc::now();
            self.prompts.update(prompt).await?;
            self.unbind(&runner.device_id).await;
            return Err(e);
        }

        Ok(())
    }

    async fn unbind(&self, device_id: &str) {
        match self.runners.get(device_id).await {
            Ok(Some(mut runner)) => {
                runner.task_id = None;
                runner.status = RunnerStatus::Online;
                if let Err(e) = self.runners.update(&runner).await {
                    tracing::warn!(device_id, error = %e, "failed to unbind runner from prompt");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(device_id, error = %e, "failed to load runner for unbind"),
        }
    }
}
