//! SQLite implementation of the FederatedRepository.
//!
//! The collecting → aggregating transition is a conditional UPDATE; the one
//! caller whose statement affects a row owns the aggregation.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlRound, FlSession, ParticipantStatus, RoundParticipant, RoundStatus, SessionConfig,
    SessionStatus, TrainingData,
};
use crate::domain::ports::FederatedRepository;

#[derive(Clone)]
pub struct SqliteFederatedRepository {
    pool: SqlitePool,
}

impl SqliteFederatedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FederatedRepository for SqliteFederatedRepository {
    async fn create_session(&self, session: &FlSession) -> DomainResult<()> {
        let global_model_json = session
            .global_model
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config_json = serde_json::to_string(&session.config)?;
        let training_data_json = serde_json::to_string(&session.training_data)?;

        sqlx::query(
            r#"INSERT INTO fl_sessions (id, name, model_type, global_model, config,
               training_data, current_round, total_rounds, min_participants, status,
               creator_address, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.to_string())
        .bind(&session.name)
        .bind(&session.model_type)
        .bind(&global_model_json)
        .bind(&config_json)
        .bind(&training_data_json)
        .bind(i64::from(session.current_round))
        .bind(i64::from(session.total_rounds))
        .bind(i64::from(session.min_participants))
        .bind(session.status.as_str())
        .bind(&session.creator_address)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<FlSession>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM fl_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_session(&self, session: &FlSession) -> DomainResult<()> {
        let global_model_json = session
            .global_model
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config_json = serde_json::to_string(&session.config)?;
        let training_data_json = serde_json::to_string(&session.training_data)?;

        let result = sqlx::query(
            r#"UPDATE fl_sessions SET name = ?, model_type = ?, global_model = ?,
               config = ?, training_data = ?, current_round = ?, total_rounds = ?,
               min_participants = ?, status = ?, updated_at = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(&session.name)
        .bind(&session.model_type)
        .bind(&global_model_json)
        .bind(&config_json)
        .bind(&training_data_json)
        .bind(i64::from(session.current_round))
        .bind(i64::from(session.total_rounds))
        .bind(i64::from(session.min_participants))
        .bind(session.status.as_str())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SessionNotFound(session.id));
        }

        Ok(())
    }

    async fn list_sessions(&self) -> DomainResult<Vec<FlSession>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM fl_sessions ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_session_participants(
        &self,
        session_id: Uuid,
        device_ids: &[String],
    ) -> DomainResult<()> {
        sqlx::query("DELETE FROM fl_session_participants WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        for (position, device_id) in device_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO fl_session_participants (session_id, runner_id, position) VALUES (?, ?, ?)",
            )
            .bind(session_id.to_string())
            .bind(device_id)
            .bind(position as i64)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn get_session_participants(&self, session_id: Uuid) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT runner_id FROM fl_session_participants WHERE session_id = ? ORDER BY position",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn create_round(&self, round: &FlRound) -> DomainResult<()> {
        let aggregation_json = round
            .aggregation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO fl_rounds (id, session_id, round_number, status, aggregation,
               created_at, updated_at, completed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(round.id.to_string())
        .bind(round.session_id.to_string())
        .bind(i64::from(round.round_number))
        .bind(round.status.as_str())
        .bind(&aggregation_json)
        .bind(round.created_at.to_rfc3339())
        .bind(round.updated_at.to_rfc3339())
        .bind(round.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_round(&self, id: Uuid) -> DomainResult<Option<FlRound>> {
        let row: Option<RoundRow> = sqlx::query_as("SELECT * FROM fl_rounds WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_round_by_number(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> DomainResult<Option<FlRound>> {
        let row: Option<RoundRow> = sqlx::query_as(
            "SELECT * FROM fl_rounds WHERE session_id = ? AND round_number = ?",
        )
        .bind(session_id.to_string())
        .bind(i64::from(round_number))
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_round(&self, round: &FlRound) -> DomainResult<()> {
        let aggregation_json = round
            .aggregation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE fl_rounds SET status = ?, aggregation = ?, updated_at = ?,
               completed_at = ? WHERE id = ?"#,
        )
        .bind(round.status.as_str())
        .bind(&aggregation_json)
        .bind(round.updated_at.to_rfc3339())
        .bind(round.completed_at.map(|t| t.to_rfc3339()))
        .bind(round.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RoundNotFound(round.id));
        }

        Ok(())
    }

    async fn try_begin_aggregation(&self, round_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE fl_rounds SET status = 'aggregating', updated_at = ?
               WHERE id = ? AND status = 'collecting'"#,
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(round_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_participant(&self, participant: &RoundParticipant) -> DomainResult<()> {
        let update_json = participant
            .model_update
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metrics_json = participant
            .training_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO fl_round_participants (id, round_id, runner_id, status,
               weight, data_size, model_update, training_metrics, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(participant.id.to_string())
        .bind(participant.round_id.to_string())
        .bind(&participant.runner_id)
        .bind(participant.status.as_str())
        .bind(participant.weight)
        .bind(participant.data_size)
        .bind(&update_json)
        .bind(&metrics_json)
        .bind(participant.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_participant(
        &self,
        round_id: Uuid,
        runner_id: &str,
    ) -> DomainResult<Option<RoundParticipant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT * FROM fl_round_participants WHERE round_id = ? AND runner_id = ?",
        )
        .bind(round_id.to_string())
        .bind(runner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_participant(&self, participant: &RoundParticipant) -> DomainResult<()> {
        let update_json = participant
            .model_update
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metrics_json = participant
            .training_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE fl_round_participants SET status = ?, weight = ?, data_size = ?,
               model_update = ?, training_metrics = ?, completed_at = ? WHERE id = ?"#,
        )
        .bind(participant.status.as_str())
        .bind(participant.weight)
        .bind(participant.data_size)
        .bind(&update_json)
        .bind(&metrics_json)
        .bind(participant.completed_at.map(|t| t.to_rfc3339()))
        .bind(participant.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RoundNotFound(participant.round_id));
        }

        Ok(())
    }

    async fn list_participants(&self, round_id: Uuid) -> DomainResult<Vec<RoundParticipant>> {
        let rows: Vec<ParticipantRow> =
            sqlx::query_as("SELECT * FROM fl_round_participants WHERE round_id = ?")
                .bind(round_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    model_type: String,
    global_model: Option<String>,
    config: String,
    training_data: String,
    current_round: i64,
    total_rounds: i64,
    min_participants: i64,
    status: String,
    creator_address: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<SessionRow> for FlSession {
    type Error = DomainError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid session status: {}", row.status))
        })?;
        let config: SessionConfig = serde_json::from_str(&row.config)?;
        let training_data: TrainingData = serde_json::from_str(&row.training_data)?;
        let global_model = row
            .global_model
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(FlSession {
            id: super::parse_uuid(&row.id)?,
            name: row.name,
            model_type: row.model_type,
            global_model,
            config,
            training_data,
            current_round: row.current_round.max(0) as u32,
            total_rounds: row.total_rounds.max(0) as u32,
            min_participants: row.min_participants.max(0) as u32,
            status,
            creator_address: row.creator_address,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoundRow {
    id: String,
    session_id: String,
    round_number: i64,
    status: String,
    aggregation: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<RoundRow> for FlRound {
    type Error = DomainError;

    fn try_from(row: RoundRow) -> Result<Self, Self::Error> {
        let status = RoundStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid round status: {}", row.status))
        })?;
        let aggregation = row
            .aggregation
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(FlRound {
            id: super::parse_uuid(&row.id)?,
            session_id: super::parse_uuid(&row.session_id)?,
            round_number: row.round_number.max(0) as u32,
            status,
            aggregation,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: String,
    round_id: String,
    runner_id: String,
    status: String,
    weight: f64,
    data_size: i64,
    model_update: Option<String>,
    training_metrics: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<ParticipantRow> for RoundParticipant {
    type Error = DomainError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let status = ParticipantStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid participant status: {}", row.status))
        })?;
        let model_update = row
            .model_update
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let training_metrics = row
            .training_metrics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(RoundParticipant {
            id: super::parse_uuid(&row.id)?,
            round_id: super::parse_uuid(&row.round_id)?,
            runner_id: row.runner_id,
            status,
            weight: row.weight,
            data_size: row.data_size,
            model_update,
            training_metrics,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}
