//! Runner registry port.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Runner, RunnerStatus};

/// Result of a heartbeat upsert.
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    /// The record as persisted.
    pub runner: Runner,
    /// True when a prior record existed with status offline or busy and the
    /// heartbeat reported online. This edge wakes the dispatcher.
    pub became_available: bool,
}

/// Repository interface for Runner persistence.
#[async_trait]
pub trait RunnerRepository: Send + Sync {
    /// Create-or-update on heartbeat. A new record is created with
    /// `last_heartbeat = now`; an existing record has its status, webhook,
    /// wallet and capabilities overwritten and its heartbeat refreshed,
    /// preserving `task_id`.
    async fn upsert_on_heartbeat(&self, runner: &Runner) -> DomainResult<HeartbeatOutcome>;

    /// Update status, task binding, webhook and wallet. Refreshes
    /// `last_heartbeat` only when the new status is online. Fails with
    /// not-found when no record matches.
    async fn update(&self, runner: &Runner) -> DomainResult<()>;

    /// Get a runner by device id.
    async fn get(&self, device_id: &str) -> DomainResult<Option<Runner>>;

    /// List runners in a status.
    async fn list_by_status(&self, status: RunnerStatus) -> DomainResult<Vec<Runner>>;

    /// List all runners.
    async fn list(&self) -> DomainResult<Vec<Runner>>;

    /// List online runners with their model capabilities loaded.
    async fn list_online_with_capabilities(&self) -> DomainResult<Vec<Runner>>;

    /// Atomically bind `task_id` to the runner, succeeding only when the
    /// runner currently owns no task. The single winner of a concurrent
    /// race observes true.
    async fn try_claim(&self, device_id: &str, task_id: Uuid) -> DomainResult<bool>;

    /// Atomically mark every online/busy runner whose heartbeat is older
    /// than `timeout` as offline, clearing its task binding. Returns the
    /// affected device ids.
    async fn sweep_offline(&self, timeout: Duration) -> DomainResult<Vec<String>>;
}
