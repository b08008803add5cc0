//! SQLite implementation of the RunnerRepository.
//!
//! The offline sweep is a single conditional UPDATE so that concurrent
//! monitor cycles cannot double-transition a runner.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ModelCapability, Runner, RunnerStatus};
use crate::domain::ports::{HeartbeatOutcome, RunnerRepository};

#[derive(Clone)]
pub struct SqliteRunnerRepository {
    pool: SqlitePool,
}

impl SqliteRunnerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_capabilities(&self, runner: &mut Runner) -> DomainResult<()> {
        let rows: Vec<CapabilityRow> = sqlx::query_as(
            "SELECT * FROM model_capabilities WHERE device_id = ? ORDER BY model_name",
        )
        .bind(&runner.device_id)
        .fetch_all(&self.pool)
        .await?;

        runner.capabilities = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(())
    }

    async fn replace_capabilities(
        &self,
        device_id: &str,
        capabilities: &[ModelCapability],
    ) -> DomainResult<()> {
        sqlx::query("DELETE FROM model_capabilities WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        for cap in capabilities {
            sqlx::query(
                r#"INSERT INTO model_capabilities (id, device_id, model_name, is_loaded,
                   max_tokens, loaded_at) VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(device_id)
            .bind(&cap.model_name)
            .bind(i64::from(cap.is_loaded))
            .bind(cap.max_tokens)
            .bind(cap.loaded_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RunnerRepository for SqliteRunnerRepository {
    async fn upsert_on_heartbeat(&self, runner: &Runner) -> DomainResult<HeartbeatOutcome> {
        let now = Utc::now();
        let prior = self.get(&runner.device_id).await?;

        let became_available = prior.as_ref().is_some_and(|p| {
            matches!(p.status, RunnerStatus::Offline | RunnerStatus::Busy)
                && runner.status == RunnerStatus::Online
        });

        match prior {
            Some(prior) => {
                // task_id is preserved; a heartbeat never steals a binding.
                sqlx::query(
                    r#"UPDATE runners SET wallet_address = ?, status = ?, webhook = ?,
                       last_heartbeat = ? WHERE device_id = ?"#,
                )
                .bind(&runner.wallet_address)
                .bind(runner.status.as_str())
                .bind(&runner.webhook)
                .bind(now.to_rfc3339())
                .bind(&runner.device_id)
                .execute(&self.pool)
                .await?;

                self.replace_capabilities(&runner.device_id, &runner.capabilities).await?;

                let mut stored = runner.clone();
                stored.task_id = prior.task_id;
                stored.last_heartbeat = now;
                Ok(HeartbeatOutcome { runner: stored, became_available })
            }
            None => {
                sqlx::query(
                    r#"INSERT INTO runners (device_id, wallet_address, status, task_id,
                       webhook, last_heartbeat) VALUES (?, ?, ?, ?, ?, ?)"#,
                )
                .bind(&runner.device_id)
                .bind(&runner.wallet_address)
                .bind(runner.status.as_str())
                .bind(runner.task_id.map(|id| id.to_string()))
                .bind(&runner.webhook)
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;

                self.replace_capabilities(&runner.device_id, &runner.capabilities).await?;

                let mut stored = runner.clone();
                stored.last_heartbeat = now;
                Ok(HeartbeatOutcome { runner: stored, became_available: false })
            }
        }
    }

    async fn update(&self, runner: &Runner) -> DomainResult<()> {
        let result = if runner.status == RunnerStatus::Online {
            sqlx::query(
                r#"UPDATE runners SET wallet_address = ?, status = ?, task_id = ?,
                   webhook = ?, last_heartbeat = ? WHERE device_id = ?"#,
            )
            .bind(&runner.wallet_address)
            .bind(runner.status.as_str())
            .bind(runner.task_id.map(|id| id.to_string()))
            .bind(&runner.webhook)
            .bind(Utc::now().to_rfc3339())
            .bind(&runner.device_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"UPDATE runners SET wallet_address = ?, status = ?, task_id = ?,
                   webhook = ? WHERE device_id = ?"#,
            )
            .bind(&runner.wallet_address)
            .bind(runner.status.as_str())
            .bind(runner.task_id.map(|id| id.to_string()))
            .bind(&runner.webhook)
            .bind(&runner.device_id)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(DomainError::RunnerNotFound(runner.device_id.clone()));
        }

        Ok(())
    }

    async fn get(&self, device_id: &str) -> DomainResult<Option<Runner>> {
        let row: Option<RunnerRow> = sqlx::query_as("SELECT * FROM runners WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut runner: Runner = row.try_into()?;
                self.load_capabilities(&mut runner).await?;
                Ok(Some(runner))
            }
            None => Ok(None),
        }
    }

    async fn list_by_status(&self, status: RunnerStatus) -> DomainResult<Vec<Runner>> {
        let rows: Vec<RunnerRow> =
            sqlx::query_as("SELECT * FROM runners WHERE status = ? ORDER BY device_id")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self) -> DomainResult<Vec<Runner>> {
        let rows: Vec<RunnerRow> = sqlx::query_as("SELECT * FROM runners ORDER BY device_id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_online_with_capabilities(&self) -> DomainResult<Vec<Runner>> {
        let mut runners = self.list_by_status(RunnerStatus::Online).await?;
        for runner in &mut runners {
            self.load_capabilities(runner).await?;
        }
        Ok(runners)
    }

    async fn try_claim(&self, device_id: &str, task_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE runners SET task_id = ? WHERE device_id = ? AND task_id IS NULL",
        )
        .bind(task_id.to_string())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sweep_offline(&self, timeout: Duration) -> DomainResult<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE runners SET status = 'offline', task_id = NULL
               WHERE last_heartbeat < ? AND status IN ('online', 'busy')
               RETURNING device_id"#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[derive(sqlx::FromRow)]
struct RunnerRow {
    device_id: String,
    wallet_address: String,
    status: String,
    task_id: Option<String>,
    webhook: String,
    last_heartbeat: String,
}

impl TryFrom<RunnerRow> for Runner {
    type Error = DomainError;

    fn try_from(row: RunnerRow) -> Result<Self, Self::Error> {
        let status = RunnerStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid runner status: {}", row.status))
        })?;
        let task_id = row
            .task_id
            .as_deref()
            .map(super::parse_uuid)
            .transpose()?;

        Ok(Runner {
            device_id: row.device_id,
            wallet_address: row.wallet_address,
            status,
            task_id,
            webhook: row.webhook,
            last_heartbeat: super::parse_datetime(&row.last_heartbeat)?,
            capabilities: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct CapabilityRow {
    #[allow(dead_code)]
    id: String,
    #[allow(dead_code)]
    device_id: String,
    model_name: String,
    is_loaded: i64,
    max_tokens: i64,
    loaded_at: Option<String>,
}

impl TryFrom<CapabilityRow> for ModelCapability {
    type Error = DomainError;

    fn try_from(row: CapabilityRow) -> Result<Self, Self::Error> {
        Ok(ModelCapability {
            model_name: row.model_name,
            is_loaded: row.is_loaded != 0,
            max_tokens: row.max_tokens,
            loaded_at: super::parse_optional_datetime(row.loaded_at)?,
        })
    }
}
