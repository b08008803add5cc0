//! Inference prompt domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an inference prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    /// No capable runner was available; waiting in the retry queue.
    Queued,
    /// Forwarded to a runner.
    Processing,
    /// Response received and billed.
    Completed,
    /// Delivery failed or retries exhausted.
    Failed,
}

impl PromptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An LLM inference request routed through the prompt queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub id: Uuid,
    pub client_id: String,
    pub prompt: String,
    pub model_name: String,
    pub status: PromptStatus,
    /// Device id of the runner serving this prompt; empty when queued.
    #[serde(default)]
    pub runner_id: String,
    #[serde(default)]
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PromptRequest {
    pub fn new(
        client_id: impl Into<String>,
        prompt: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            prompt: prompt.into(),
            model_name: model_name.into(),
            status: PromptStatus::Queued,
            runner_id: String::new(),
            response: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Usage metrics recorded when a prompt completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingMetrics {
    pub id: Uuid,
    pub prompt_id: Uuid,
    pub client_id: String,
    pub prompt_tokens: i64,
    pub response_tokens: i64,
    pub total_tokens: i64,
    pub inference_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl BillingMetrics {
    pub fn new(
        prompt_id: Uuid,
        client_id: impl Into<String>,
        prompt_tokens: i64,
        response_tokens: i64,
        inference_time_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt_id,
            client_id: client_id.into(),
            prompt_tokens,
            response_tokens,
            total_tokens: prompt_tokens + response_tokens,
            inference_time_ms,
            created_at: Utc::now(),
        }
    }
}

/// A queue entry tracking retry state for a prompt without a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPrompt {
    pub prompt_id: Uuid,
    pub model_name: String,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedPrompt {
    /// Default retry budget before a queued prompt is failed.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    pub fn new(prompt_id: Uuid, model_name: impl Into<String>) -> Self {
        Self {
            prompt_id,
            model_name: model_name.into(),
            queued_at: Utc::now(),
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_totals_sum_prompt_and_response() {
        let metrics = BillingMetrics::new(Uuid::new_v4(), "c1", 120, 480, 950);
        assert_eq!(metrics.total_tokens, 600);
    }

    #[test]
    fn queued_prompt_exhausts_after_max_retries() {
        let mut entry = QueuedPrompt::new(Uuid::new_v4(), "qwen3");
        assert!(!entry.retries_exhausted());
        entry.retry_count = QueuedPrompt::DEFAULT_MAX_RETRIES;
        assert!(entry.retries_exhausted());
    }
}
