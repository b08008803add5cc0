//! JSON-RPC ledger client.
//!
//! Settlement is an observation, not a transaction: the coordinator's
//! database is the system of record and a failed transfer never rolls back
//! task state. Retries use bounded exponential backoff; the result id is the
//! dedupe key so an in-process retry settles at most once per result.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LedgerConfig, TaskResult};
use crate::domain::ports::LedgerClient;

/// Per-request timeout for ledger RPC calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on total retry time for a single settlement.
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(120);

pub struct RpcLedgerClient {
    http: Client,
    config: LedgerConfig,
    /// Result ids already settled in this process.
    settled: Mutex<HashSet<Uuid>>,
}

impl RpcLedgerClient {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            settled: Mutex::new(HashSet::new()),
        }
    }

    fn mark_settled(&self, id: Uuid) -> bool {
        self.settled
            .lock()
            .map(|mut set| set.insert(id))
            .unwrap_or(true)
    }

    async fn submit_transfer(&self, result: &TaskResult) -> DomainResult<()> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": result.id.to_string(),
            "method": "ledger_transferReward",
            "params": [{
                "chain_id": self.config.chain_id,
                "token": self.config.token_address,
                "to": result.runner_address,
                "amount": result.reward,
                "dedupe_key": result.id.to_string(),
            }],
        });

        let response = self
            .http
            .post(&self.config.rpc)
            .timeout(RPC_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::LedgerError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::LedgerError(format!(
                "ledger rpc returned {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DomainError::LedgerError(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            return Err(DomainError::LedgerError(error.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn transfer_reward(&self, result: &TaskResult) -> DomainResult<()> {
        if self.config.rpc.is_empty() {
            tracing::debug!(result_id = %result.id, "ledger rpc not configured, skipping settlement");
            return Ok(());
        }
        if result.reward <= 0.0 {
            return Ok(());
        }
        if !self.mark_settled(result.id) {
            tracing::debug!(result_id = %result.id, "settlement already submitted, skipping");
            return Ok(());
        }

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..ExponentialBackoff::default()
        };

        let outcome = backoff::future::retry(policy, || async {
            self.submit_transfer(result).await.map_err(|e| {
                tracing::warn!(result_id = %result.id, error = %e, "ledger transfer attempt failed");
                backoff::Error::transient(e)
            })
        })
        .await;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    result_id = %result.id,
                    runner = %result.runner_address,
                    reward = result.reward,
                    "reward settled on ledger"
                );
                Ok(())
            }
            Err(e) => {
                // Drop the dedupe mark so a later manual retry can resubmit.
                if let Ok(mut set) = self.settled.lock() {
                    set.remove(&result.id);
                }
                Err(e)
            }
        }
    }
}

/// No-op ledger for tests and ledger-less deployments.
#[derive(Debug, Default)]
pub struct NullLedger;

#[async_trait]
impl LedgerClient for NullLedger {
    async fn transfer_reward(&self, result: &TaskResult) -> DomainResult<()> {
        tracing::debug!(result_id = %result.id, "null ledger: settlement skipped");
        Ok(())
    }
}
