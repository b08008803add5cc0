//! Federated-learning store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{FlRound, FlSession, RoundParticipant};

/// Repository interface for sessions, rounds and participants.
#[async_trait]
pub trait FederatedRepository: Send + Sync {
    async fn create_session(&self, session: &FlSession) -> DomainResult<()>;

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<FlSession>>;

    async fn update_session(&self, session: &FlSession) -> DomainResult<()>;

    async fn list_sessions(&self) -> DomainResult<Vec<FlSession>>;

    /// Record the authoritative participant set at session start. Positions
    /// follow the slice order and fix partition indices for every round.
    async fn set_session_participants(
        &self,
        session_id: Uuid,
        device_ids: &[String],
    ) -> DomainResult<()>;

    /// The participant set in stored position order.
    async fn get_session_participants(&self, session_id: Uuid) -> DomainResult<Vec<String>>;

    async fn create_round(&self, round: &FlRound) -> DomainResult<()>;

    async fn get_round(&self, id: Uuid) -> DomainResult<Option<FlRound>>;

    async fn get_round_by_number(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> DomainResult<Option<FlRound>>;

    async fn update_round(&self, round: &FlRound) -> DomainResult<()>;

    /// Compare-and-set the round from collecting to aggregating. Returns
    /// true for the single caller that wins; aggregation runs exactly once.
    async fn try_begin_aggregation(&self, round_id: Uuid) -> DomainResult<bool>;

    async fn create_participant(&self, participant: &RoundParticipant) -> DomainResult<()>;

    async fn get_participant(
        &self,
        round_id: Uuid,
        runner_id: &str,
    ) -> DomainResult<Option<RoundParticipant>>;

    async fn update_participant(&self, participant: &RoundParticipant) -> DomainResult<()>;

    async fn list_participants(&self, round_id: Uuid) -> DomainResult<Vec<RoundParticipant>>;
}
