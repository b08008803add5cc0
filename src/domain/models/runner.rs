//! Runner domain model.
//!
//! Runners are worker nodes identified by their device id. They come and go
//! via heartbeats; the registry is the system of record for their liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness/occupancy status of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Heartbeating and idle.
    Online,
    /// Heartbeating but bound to a task.
    Busy,
    /// Missed heartbeats past the timeout, or reported itself offline.
    Offline,
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(Self::Online),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// An inference model a runner can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapability {
    pub model_name: String,
    /// Whether the model is resident in memory and ready to serve.
    pub is_loaded: bool,
    #[serde(default)]
    pub max_tokens: i64,
    #[serde(default)]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ModelCapability {
    /// Whether this capability satisfies a requested model name.
    ///
    /// Matches exactly, or by base name when either side carries a tag:
    /// capability `qwen3` serves request `qwen3:8b` and vice-versa.
    pub fn matches(&self, requested: &str) -> bool {
        if self.model_name == requested {
            return true;
        }
        let base = |name: &str| name.split(':').next().unwrap_or(name).to_string();
        base(&self.model_name) == base(requested)
    }
}

/// A worker node registered with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    /// Primary identifier.
    pub device_id: String,
    #[serde(default)]
    pub wallet_address: String,
    pub status: RunnerStatus,
    /// Id of the task this runner currently owns, if any.
    #[serde(default)]
    pub task_id: Option<uuid::Uuid>,
    /// Delivery URL for task notifications; empty means unreachable by push.
    #[serde(default)]
    pub webhook: String,
    pub last_heartbeat: DateTime<Utc>,
    /// Inference models this runner serves (inference dispatch only).
    #[serde(default)]
    pub capabilities: Vec<ModelCapability>,
}

impl Runner {
    /// Create a runner record as of its first heartbeat.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            wallet_address: String::new(),
            status: RunnerStatus::Online,
            task_id: None,
            webhook: String::new(),
            last_heartbeat: Utc::now(),
            capabilities: Vec::new(),
        }
    }

    /// Whether the runner can be handed a task right now.
    pub fn is_available(&self) -> bool {
        self.status == RunnerStatus::Online && self.task_id.is_none()
    }

    /// Find a loaded capability matching the requested model name.
    pub fn loaded_capability_for(&self, model: &str) -> Option<&ModelCapability> {
        self.capabilities
            .iter()
            .find(|cap| cap.is_loaded && cap.matches(model))
    }
}
