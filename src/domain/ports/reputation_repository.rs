//! Runner reputation bookkeeping port.
//!
//! The scoring formula is out of scope; this port records events and keeps a
//! running score per runner.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// A runner's accumulated reputation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reputation {
    pub device_id: String,
    pub score: f64,
    pub tasks_completed: u64,
    pub tasks_stalled: u64,
}

#[async_trait]
pub trait ReputationRepository: Send + Sync {
    /// Append an event and fold its delta into the runner's score.
    async fn record_event(
        &self,
        device_id: &str,
        event_type: &str,
        delta: f64,
        task_id: Option<Uuid>,
    ) -> DomainResult<()>;

    async fn get(&self, device_id: &str) -> DomainResult<Option<Reputation>>;
}
