//! Prompt request store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BillingMetrics, PromptRequest, PromptStatus};

/// Repository interface for inference prompt persistence.
#[async_trait]
pub trait PromptRepository: Send + Sync {
    async fn create(&self, prompt: &PromptRequest) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<PromptRequest>>;

    async fn update(&self, prompt: &PromptRequest) -> DomainResult<()>;

    async fn list_by_status(&self, status: PromptStatus) -> DomainResult<Vec<PromptRequest>>;

    /// Record usage metrics for a completed prompt.
    async fn save_billing(&self, metrics: &BillingMetrics) -> DomainResult<()>;

    async fn get_billing(&self, prompt_id: Uuid) -> DomainResult<Option<BillingMetrics>>;
}
