//! Task domain model.
//!
//! Tasks are the discrete units of work that runners compete for. A task is
//! created pending, bound to exactly one runner on dispatch, and completed
//! when that runner submits a result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for a runner.
    Pending,
    /// Bound to a runner that acknowledged the work.
    Running,
    /// A result was saved.
    Completed,
    /// The task failed permanently.
    Failed,
    /// A result arrived but its hash or nonce checks disagreed.
    NotVerified,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotVerified => "not_verified",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "not_verified" | "not-verified" => Some(Self::NotVerified),
            _ => None,
        }
    }

    /// Terminal states admit no further lifecycle writes besides the result
    /// and `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotVerified)
    }
}

/// What kind of work a task represents.
///
/// The dispatcher treats the variants uniformly except at validation time
/// and when the federated coordinator constructs per-round training tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Containerized workload; requires an image and a container environment.
    Container,
    /// Plain command execution.
    Command,
    /// LLM inference request, dispatched through the prompt queue.
    Inference,
    /// One participant's share of a federated-learning round.
    FederatedTraining,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Command => "command",
            Self::Inference => "inference",
            Self::FederatedTraining => "federated_training",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "container" => Some(Self::Container),
            "command" => Some(Self::Command),
            "inference" => Some(Self::Inference),
            "federated_training" | "federated-training" => Some(Self::FederatedTraining),
            _ => None,
        }
    }
}

/// Typed execution environment attached to a task.
///
/// Container tasks require `kind == "container"`; the remaining fields are
/// passed through to the runner untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvironment {
    /// Environment kind discriminator ("container" is the only kind the
    /// coordinator validates).
    #[serde(rename = "type")]
    pub kind: String,
    /// Environment-specific settings (image, mounts, env vars, resources).
    #[serde(default)]
    pub config: Value,
}

impl TaskEnvironment {
    pub fn is_container(&self) -> bool {
        self.kind == "container"
    }
}

/// A discrete unit of compute work with a typed config and a lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Work variant.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Human-readable title.
    pub title: String,
    /// Detailed description.
    pub description: String,
    /// Opaque JSON payload; semantics depend on `task_type`.
    pub config: Value,
    /// Optional typed execution environment.
    pub environment: Option<TaskEnvironment>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Reward settled on completion.
    pub reward: f64,
    /// Wallet address of the task creator.
    pub creator_address: String,
    /// Device id of the task creator.
    pub creator_device_id: String,
    /// Device id of the currently-bound runner; empty when unbound.
    /// Preserved after completion for audit.
    pub runner_id: String,
    /// Per-dispatch unguessable token; set before the task leaves pending.
    pub nonce: String,
    /// Content hash of the container image, when applicable.
    pub image_hash: String,
    /// Content hash of the command line, when applicable.
    pub command_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(task_type: TaskType, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type,
            title: title.into(),
            description: String::new(),
            config: Value::Object(serde_json::Map::new()),
            environment: None,
            status: TaskStatus::default(),
            reward: 0.0,
            creator_address: String::new(),
            creator_device_id: String::new(),
            runner_id: String::new(),
            nonce: String::new(),
            image_hash: String::new(),
            command_hash: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Set the description (builder method).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the opaque config payload (builder method).
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Set the execution environment (builder method).
    pub fn with_environment(mut self, environment: TaskEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Set the creator identity (builder method).
    pub fn with_creator(
        mut self,
        address: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        self.creator_address = address.into();
        self.creator_device_id = device_id.into();
        self
    }

    /// Whether the task is currently bound to a runner.
    pub fn is_bound(&self) -> bool {
        !self.runner_id.is_empty()
    }

    /// Validate the task for creation.
    ///
    /// Container tasks must name an image, carry an image or file URL, and
    /// have a container-typed environment block.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("task title cannot be empty".to_string());
        }

        if self.task_type == TaskType::Container {
            let image = self.config.get("image").and_then(Value::as_str).unwrap_or("");
            if image.is_empty() {
                return Err("container task config must name an image".to_string());
            }
            let has_source = ["image_url", "file_url"].iter().any(|key| {
                self.config
                    .get(*key)
                    .and_then(Value::as_str)
                    .is_some_and(|u| !u.is_empty())
            });
            if !has_source {
                return Err(
                    "container task config must carry an image_url or file_url".to_string()
                );
            }
            match &self.environment {
                Some(env) if env.is_container() => {}
                Some(_) => {
                    return Err("container task environment must be container-typed".to_string())
                }
                None => return Err("container task requires an environment block".to_string()),
            }
        }

        Ok(())
    }
}
