//! SQLite implementation of the PromptRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BillingMetrics, PromptRequest, PromptStatus};
use crate::domain::ports::PromptRepository;

#[derive(Clone)]
pub struct SqlitePromptRepository {
    pool: SqlitePool,
}

impl SqlitePromptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromptRepository for SqlitePromptRepository {
    async fn create(&self, prompt: &PromptRequest) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO prompt_requests (id, client_id, prompt, model_name, status,
               runner_id, response, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(prompt.id.to_string())
        .bind(&prompt.client_id)
        .bind(&prompt.prompt)
        .bind(&prompt.model_name)
        .bind(prompt.status.as_str())
        .bind(&prompt.runner_id)
        .bind(&prompt.response)
        .bind(prompt.created_at.to_rfc3339())
        .bind(prompt.updated_at.to_rfc3339())
        .bind(prompt.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<PromptRequest>> {
        let row: Option<PromptRow> = sqlx::query_as("SELECT * FROM prompt_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, prompt: &PromptRequest) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE prompt_requests SET status = ?, runner_id = ?, response = ?,
               updated_at = ?, completed_at = ? WHERE id = ?"#,
        )
        .bind(prompt.status.as_str())
        .bind(&prompt.runner_id)
        .bind(&prompt.response)
        .bind(prompt.updated_at.to_rfc3339())
        .bind(prompt.completed_at.map(|t| t.to_rfc3339()))
        .bind(prompt.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PromptNotFound(prompt.id));
        }

        Ok(())
    }

    async fn list_by_status(&self, status: PromptStatus) -> DomainResult<Vec<PromptRequest>> {
        let rows: Vec<PromptRow> = sqlx::query_as(
            "SELECT * FROM prompt_requests WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_billing(&self, metrics: &BillingMetrics) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO billing_metrics (id, prompt_id, client_id, prompt_tokens,
               response_tokens, total_tokens, inference_time_ms, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(metrics.id.to_string())
        .bind(metrics.prompt_id.to_string())
        .bind(&metrics.client_id)
        .bind(metrics.prompt_tokens)
        .bind(metrics.response_tokens)
        .bind(metrics.total_tokens)
        .bind(metrics.inference_time_ms)
        .bind(metrics.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_billing(&self, prompt_id: Uuid) -> DomainResult<Option<BillingMetrics>> {
        let row: Option<BillingRow> =
            sqlx::query_as("SELECT * FROM billing_metrics WHERE prompt_id = ?")
                .bind(prompt_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct PromptRow {
    id: String,
    client_id: String,
    prompt: String,
    model_name: String,
    status: String,
    runner_id: String,
    response: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<PromptRow> for PromptRequest {
    type Error = DomainError;

    fn try_from(row: PromptRow) -> Result<Self, Self::Error> {
        let status = PromptStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid prompt status: {}", row.status))
        })?;

        Ok(PromptRequest {
            id: super::parse_uuid(&row.id)?,
            client_id: row.client_id,
            prompt: row.prompt,
            model_name: row.model_name,
            status,
            runner_id: row.runner_id,
            response: row.response,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BillingRow {
    id: String,
    prompt_id: String,
    client_id: String,
    prompt_tokens: i64,
    response_tokens: i64,
    total_tokens: i64,
    inference_time_ms: i64,
    created_at: String,
}

impl TryFrom<BillingRow> for BillingMetrics {
    type Error = DomainError;

    fn try_from(row: BillingRow) -> Result<Self, Self::Error> {
        Ok(BillingMetrics {
            id: super::parse_uuid(&row.id)?,
            prompt_id: super::parse_uuid(&row.prompt_id)?,
            client_id: row.client_id,
            prompt_tokens: row.prompt_tokens,
            response_tokens: row.response_tokens,
            total_tokens: row.total_tokens,
            inference_time_ms: row.inference_time_ms,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}
