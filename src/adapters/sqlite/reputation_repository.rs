//! SQLite implementation of the ReputationRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::reputation_repository::{Reputation, ReputationRepository};

#[derive(Clone)]
pub struct SqliteReputationRepository {
    pool: SqlitePool,
}

impl SqliteReputationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReputationRepository for SqliteReputationRepository {
    async fn record_event(
        &self,
        device_id: &str,
        event_type: &str,
        delta: f64,
        task_id: Option<Uuid>,
    ) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO reputation_events (id, device_id, event_type, delta, task_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(event_type)
        .bind(delta)
        .bind(task_id.map(|id| id.to_string()))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let completed_bump = i64::from(event_type == "task_completed");
        let stalled_bump = i64::from(event_type == "task_stalled");

        sqlx::query(
            r#"INSERT INTO runner_reputation (device_id, score, tasks_completed, tasks_stalled, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(device_id) DO UPDATE SET
                   score = score + excluded.score,
                   tasks_completed = tasks_completed + excluded.tasks_completed,
                   tasks_stalled = tasks_stalled + excluded.tasks_stalled,
                   updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(delta)
        .bind(completed_bump)
        .bind(stalled_bump)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, device_id: &str) -> DomainResult<Option<Reputation>> {
        let row: Option<(String, f64, i64, i64)> = sqlx::query_as(
            "SELECT device_id, score, tasks_completed, tasks_stalled FROM runner_reputation WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(device_id, score, completed, stalled)| Reputation {
            device_id,
            score,
            tasks_completed: completed.max(0) as u64,
            tasks_stalled: stalled.max(0) as u64,
        }))
    }
}
