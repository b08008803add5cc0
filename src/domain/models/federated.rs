//! Federated-learning domain model.
//!
//! A session owns its rounds; a round owns its participants. All
//! cross-references are by identifier. The session's `global_model` is an
//! opaque tensor bundle referenced by content, never interpreted here beyond
//! the layer-name → vector shape the aggregator needs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a federated-learning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Status of one synchronization round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    /// Training tasks dispatched; waiting for participant updates.
    Collecting,
    /// Completion threshold reached; averaging in progress. The
    /// collecting → aggregating transition is the exactly-once guard.
    Aggregating,
    Completed,
    Failed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "collecting" => Some(Self::Collecting),
            "aggregating" => Some(Self::Aggregating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Status of a participant within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Assigned,
    Training,
    Completed,
    Failed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Training => "training",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "assigned" => Some(Self::Assigned),
            "training" => Some(Self::Training),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Training hyperparameters and privacy settings for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "defaults::aggregation_method")]
    pub aggregation_method: String,
    #[serde(default = "defaults::learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
    #[serde(default = "defaults::local_epochs")]
    pub local_epochs: u32,
    #[serde(default = "defaults::hidden_size")]
    pub hidden_size: u32,
    /// Opaque privacy settings (differential privacy budgets, clipping).
    #[serde(default)]
    pub privacy: Value,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            aggregation_method: defaults::aggregation_method(),
            learning_rate: defaults::learning_rate(),
            batch_size: defaults::batch_size(),
            local_epochs: defaults::local_epochs(),
            hidden_size: defaults::hidden_size(),
            privacy: Value::Null,
        }
    }
}

mod defaults {
    pub fn aggregation_method() -> String {
        "federated_averaging".to_string()
    }
    pub fn learning_rate() -> f64 {
        0.01
    }
    pub fn batch_size() -> u32 {
        32
    }
    pub fn local_epochs() -> u32 {
        1
    }
    pub fn hidden_size() -> u32 {
        64
    }
}

/// Reference to the session's training dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    /// Content hash of the dataset in the artifact store.
    #[serde(default)]
    pub dataset_hash: String,
    #[serde(default)]
    pub format: String,
    #[serde(default = "default_split_strategy")]
    pub split_strategy: String,
    /// Opaque partition metadata forwarded to participants.
    #[serde(default)]
    pub metadata: Value,
}

fn default_split_strategy() -> String {
    "random".to_string()
}

/// Deterministic slice of the dataset assigned to one participant.
///
/// `part_index` is the participant's position in the session's authoritative
/// participant list, fixed at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub strategy: String,
    pub total_parts: u32,
    pub part_index: u32,
    #[serde(default)]
    pub alpha: f64,
    #[serde(default)]
    pub min_samples: u32,
    #[serde(default)]
    pub overlap_ratio: f64,
}

/// A multi-round federated-learning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlSession {
    pub id: Uuid,
    pub name: String,
    pub model_type: String,
    /// Opaque tensor bundle; replaced by each round's aggregation.
    pub global_model: Option<Value>,
    pub config: SessionConfig,
    pub training_data: TrainingData,
    pub current_round: u32,
    pub total_rounds: u32,
    pub min_participants: u32,
    pub status: SessionStatus,
    #[serde(default)]
    pub creator_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlSession {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>, total_rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            model_type: model_type.into(),
            global_model: None,
            config: SessionConfig::default(),
            training_data: TrainingData::default(),
            current_round: 0,
            total_rounds,
            min_participants: 2,
            status: SessionStatus::Pending,
            creator_address: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether every round has been driven to aggregation.
    pub fn all_rounds_done(&self) -> bool {
        self.current_round >= self.total_rounds
    }
}

/// One synchronization cycle: assign → collect → aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlRound {
    pub id: Uuid,
    pub session_id: Uuid,
    pub round_number: u32,
    pub status: RoundStatus,
    /// Opaque result bundle written at aggregation.
    pub aggregation: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlRound {
    pub fn new(session_id: Uuid, round_number: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            round_number,
            status: RoundStatus::Collecting,
            aggregation: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// One runner's share of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundParticipant {
    pub id: Uuid,
    pub round_id: Uuid,
    pub runner_id: String,
    pub status: ParticipantStatus,
    pub weight: f64,
    pub data_size: i64,
    /// Opaque update payload; shaped as [`ModelUpdate`] when present.
    pub model_update: Option<Value>,
    pub training_metrics: Option<Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RoundParticipant {
    pub fn new(round_id: Uuid, runner_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            runner_id: runner_id.into(),
            status: ParticipantStatus::Assigned,
            weight: 1.0,
            data_size: 0,
            model_update: None,
            training_metrics: None,
            completed_at: None,
        }
    }
}

/// The structured payload a participant submits at the end of local training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    /// Per-layer gradient vectors.
    pub gradients: HashMap<String, Vec<f64>>,
    /// Per-layer weight vectors, when the update carries full weights.
    #[serde(default)]
    pub weights: Option<HashMap<String, Vec<f64>>>,
    #[serde(default)]
    pub update_type: String,
    /// Number of local training samples; the aggregation weight.
    #[serde(default)]
    pub data_size: i64,
    #[serde(default)]
    pub loss: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Metrics computed across a round's participants at aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub average_loss: f64,
    pub average_accuracy: f64,
    pub loss_variance: f64,
    /// `max(0, 1 − variance / average_loss)`; 1.0 when variance is zero.
    pub convergence: f64,
    pub participant_count: usize,
    pub total_weight: f64,
}

/// The aggregation bundle written to the round and promoted to the session's
/// global model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundAggregation {
    pub gradients: HashMap<String, Vec<f64>>,
    #[serde(default)]
    pub weights: Option<HashMap<String, Vec<f64>>>,
    pub metrics: RoundMetrics,
}
