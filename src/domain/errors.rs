//! Domain errors for the drover coordinator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the coordinator.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Runner not found: {0}")]
    RunnerNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Round not found: {0}")]
    RoundNotFound(Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        DomainError::DeliveryFailed(err.to_string())
    }
}
