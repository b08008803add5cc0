//! Task result domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource usage reported by a runner alongside a result.
///
/// The reward calculator folds this vector into a scalar reward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub cpu_seconds: f64,
    #[serde(default)]
    pub estimated_cycles: u64,
    #[serde(default)]
    pub memory_gb_hours: f64,
    #[serde(default)]
    pub storage_gb: f64,
    #[serde(default)]
    pub network_gb: f64,
}

/// The outcome a runner reports for a task it executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Device id of the submitting runner.
    pub device_id: String,
    /// Hash of the device id, carried for on-chain attribution.
    #[serde(default)]
    pub device_id_hash: String,
    /// Alternate device id some runner builds report; used as the last
    /// fallback when resolving which runner to unbind.
    #[serde(default)]
    pub solver_device_id: String,
    /// The dispatch nonce echoed back to prove execution.
    #[serde(default)]
    pub nonce: String,
    /// Wallet address of the submitting runner.
    #[serde(default)]
    pub runner_address: String,
    /// Wallet address of the task creator, echoed for settlement.
    #[serde(default)]
    pub creator_address: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub execution_time_ms: i64,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    /// Reward computed at save time; zero until then.
    #[serde(default)]
    pub reward: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TaskResult {
    /// Create a result shell for a task submission.
    pub fn new(task_id: Uuid, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            device_id: device_id.into(),
            device_id_hash: String::new(),
            solver_device_id: String::new(),
            nonce: String::new(),
            runner_address: String::new(),
            creator_address: String::new(),
            output: String::new(),
            error: String::new(),
            exit_code: 0,
            execution_time_ms: 0,
            resource_usage: ResourceUsage::default(),
            reward: 0.0,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_deserializes_with_missing_optional_fields() {
        let task_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"id":"{}","task_id":"{}","device_id":"r1","exit_code":0}}"#,
            Uuid::new_v4(),
            task_id
        );
        let result: TaskResult = serde_json::from_str(&raw).expect("should deserialize");
        assert_eq!(result.task_id, task_id);
        assert_eq!(result.resource_usage, ResourceUsage::default());
        assert_eq!(result.reward, 0.0);
    }
}
