//! External ledger settlement port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskResult;

/// Best-effort reward settlement.
///
/// The database is the system of record; the ledger is an observation.
/// Implementations must treat `result.id` as a dedupe key so a retried
/// settlement is at most once per result within a process lifetime.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Transfer `result.reward` to `result.runner_address`.
    async fn transfer_reward(&self, result: &TaskResult) -> DomainResult<()>;
}
