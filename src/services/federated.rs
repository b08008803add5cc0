//! Federated-learning coordinator.
//!
//! A session is a state machine layered on the dispatcher: each round
//! creates one training task per registered participant, collects their
//! model updates, and closes with a weighted federated average that becomes
//! the session's new global model. The participant set is copied into its
//! own table at session start; positions in that table fix every round's
//! partition indices.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlRound, FlSession, ModelUpdate, ParticipantStatus, PartitionConfig, RoundParticipant,
    RoundStatus, RunnerStatus, SessionConfig, SessionStatus, Task, TaskType, TrainingData,
};
use crate::domain::ports::{FederatedRepository, RunnerRepository};
use crate::services::aggregation::aggregate_updates;
use crate::services::dispatcher::Dispatcher;

/// Client request to create a session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub model_type: String,
    pub total_rounds: u32,
    #[serde(default)]
    pub min_participants: Option<u32>,
    #[serde(default)]
    pub config: Option<SessionConfig>,
    #[serde(default)]
    pub training_data: Option<TrainingData>,
    #[serde(default)]
    pub global_model: Option<Value>,
    #[serde(default)]
    pub creator_address: String,
}

/// A participant's end-of-round submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitUpdateRequest {
    /// Round number; defaults to the session's current round.
    #[serde(default)]
    pub round_number: Option<u32>,
    pub runner_id: String,
    #[serde(flatten)]
    pub update: ModelUpdate,
}

/// The trained model returned once a session holds a global model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainedModel {
    pub session_id: Uuid,
    pub name: String,
    pub model_type: String,
    pub status: String,
    pub total_rounds: u32,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub model_data: Value,
}

pub struct FlCoordinator {
    repo: Arc<dyn FederatedRepository>,
    runners: Arc<dyn RunnerRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl FlCoordinator {
    pub fn new(
        repo: Arc<dyn FederatedRepository>,
        runners: Arc<dyn RunnerRepository>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { repo, runners, dispatcher }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    pub async fn create_session(&self, request: CreateSessionRequest) -> DomainResult<FlSession> {
        if request.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed("session name cannot be empty".to_string()));
        }
        if request.total_rounds == 0 {
            return Err(DomainError::ValidationFailed(
                "session must run at least one round".to_string(),
            ));
        }

        let mut session = FlSession::new(request.name, request.model_type, request.total_rounds);
        if let Some(min) = request.min_participants {
            session.min_participants = min.max(1);
        }
        if let Some(config) = request.config {
            session.config = config;
        }
        if let Some(training_data) = request.training_data {
            session.training_data = training_data;
        }
        session.global_model = request.global_model;
        session.creator_address = request.creator_address;

        self.repo.create_session(&session).await?;
        tracing::info!(
            session_id = %session.id,
            total_rounds = session.total_rounds,
            min_participants = session.min_participants,
            "federated session created"
        );
        Ok(session)
    }

    /// Activate a pending session: pick the participant set from the
    /// runners currently online and start round one.
    pub async fn start_session(&self, session_id: Uuid) -> DomainResult<FlSession> {
        let mut session = self.get_session(session_id).await?;

        if session.status != SessionStatus::Pending {
            return Err(DomainError::Conflict(format!(
                "session {session_id} is {}, only pending sessions can start",
                session.status.as_str()
            )));
        }

        let online = self.runners.list_by_status(RunnerStatus::Online).await?;
        if (online.len() as u32) < session.min_participants {
            return Err(DomainError::Conflict(format!(
                "need {} online runners, only {} available",
                session.min_participants,
                online.len()
            )));
        }

        let participants: Vec<String> = online
            .into_iter()
            .take(session.min_participants as usize)
            .map(|r| r.device_id)
            .collect();
        self.repo.set_session_participants(session.id, &participants).await?;

        session.status = SessionStatus::Active;
        session.updated_at = Utc::now();
        self.repo.update_session(&session).await?;
        tracing::info!(session_id = %session.id, participants = participants.len(), "session started");

        self.start_next_round(&mut session).await?;
        Ok(session)
    }

    /// Open the next round, or complete the session when all rounds ran.
    async fn start_next_round(&self, session: &mut FlSession) -> DomainResult<()> {
        if session.all_rounds_done() {
            self.complete_session(session).await?;
            return Ok(());
        }

        let round = FlRound::new(session.id, session.current_round + 1);
        self.repo.create_round(&round).await?;

        session.current_round += 1;
        session.updated_at = Utc::now();
        self.repo.update_session(session).await?;
        tracing::info!(
            session_id = %session.id,
            round = round.round_number,
            "round opened, assigning participants"
        );

        self.assign_participants(session, &round).await
    }

    /// Create a round-participant record and a training task for every
    /// registered participant that is currently online.
    async fn assign_participants(&self, session: &FlSession, round: &FlRound) -> DomainResult<()> {
        let participants = self.repo.get_session_participants(session.id).await?;
        let total_parts = participants.len() as u32;

        for (position, device_id) in participants.iter().enumerate() {
            let online = match self.runners.get(device_id).await? {
                Some(runner) => runner.status != RunnerStatus::Offline,
                None => false,
            };
            if !online {
                tracing::warn!(
                    session_id = %session.id,
                    round = round.round_number,
                    device_id,
                    "participant offline, skipping this round"
                );
                continue;
            }

            let participant = RoundParticipant::new(round.id, device_id.clone());
            self.repo.create_participant(&participant).await?;

            let task = self.build_training_task(session, round, position as u32, total_parts);
            match self.dispatcher.create_task_for_runner(task, device_id).await {
                Ok(task) => {
                    tracing::info!(
                        session_id = %session.id,
                        round = round.round_number,
                        device_id,
                        task_id = %task.id,
                        "training task submitted"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        round = round.round_number,
                        device_id,
                        error = %e,
                        "training task submission failed"
                    );
                }
            }
        }

        Ok(())
    }

    /// The per-participant training task. The partition index is the
    /// participant's stored position, so every round slices the dataset the
    /// same way.
    fn build_training_task(
        &self,
        session: &FlSession,
        round: &FlRound,
        part_index: u32,
        total_parts: u32,
    ) -> Task {
        let metadata = &session.training_data.metadata;
        let partition = PartitionConfig {
            strategy: session.training_data.split_strategy.clone(),
            total_parts,
            part_index,
            alpha: metadata.get("alpha").and_then(Value::as_f64).unwrap_or(0.5),
            min_samples: metadata
                .get("min_samples")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32,
            overlap_ratio: metadata
                .get("overlap_ratio")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        };

        let config = json!({
            "session_id": session.id,
            "round_id": round.id,
            "round_number": round.round_number,
            "model_type": session.model_type,
            "dataset_hash": session.training_data.dataset_hash,
            "data_format": session.training_data.format,
            "model_config": session.config,
            "partition": partition,
            "hyperparameters": {
                "learning_rate": session.config.learning_rate,
                "batch_size": session.config.batch_size,
                "local_epochs": session.config.local_epochs,
            },
            "global_model": session.global_model,
        });

        Task::new(
            TaskType::FederatedTraining,
            format!("{} round {}", session.name, round.round_number),
        )
        .with_description(format!(
            "Local training for federated session {} round {}",
            session.id, round.round_number
        ))
        .with_config(config)
        .with_creator(session.creator_address.clone(), String::new())
    }

    // ------------------------------------------------------------------
    // Update collection and aggregation
    // ------------------------------------------------------------------

    /// Accept a participant's model update and close the round when every
    /// participant has reported.
    pub async fn submit_model_update(
        &self,
        session_id: Uuid,
        request: SubmitUpdateRequest,
    ) -> DomainResult<RoundParticipant> {
        let mut session = self.get_session(session_id).await?;

        let round_number = request.round_number.unwrap_or(session.current_round);
        let round = self
            .repo
            .get_round_by_number(session_id, round_number)
            .await?
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!(
                    "session {session_id} has no round {round_number}"
                ))
            })?;

        let mut participant =
            match self.repo.get_participant(round.id, &request.runner_id).await? {
                Some(participant) => participant,
                None => {
                    // Late registration: a runner we never assigned is still
                    // allowed to contribute.
                    tracing::warn!(
                        session_id = %session_id,
                        round = round_number,
                        runner_id = %request.runner_id,
                        "update from unassigned runner, creating participant"
                    );
                    let participant = RoundParticipant::new(round.id, request.runner_id.clone());
                    self.repo.create_participant(&participant).await?;
                    participant
                }
            };

        if !matches!(
            participant.status,
            ParticipantStatus::Assigned | ParticipantStatus::Training
        ) {
            tracing::warn!(
                session_id = %session_id,
                round = round_number,
                runner_id = %request.runner_id,
                status = participant.status.as_str(),
                "update from participant in unexpected status, accepting anyway"
            );
        }

        participant.data_size = request.update.data_size.max(0);
        participant.model_update = Some(serde_json::to_value(&request.update)?);
        participant.training_metrics = Some(json!({
            "loss": request.update.loss,
            "accuracy": request.update.accuracy,
            "update_type": request.update.update_type,
            "metadata": request.update.metadata,
        }));
        participant.status = ParticipantStatus::Completed;
        participant.completed_at = Some(Utc::now());
        self.repo.update_participant(&participant).await?;
        tracing::info!(
            session_id = %session_id,
            round = round_number,
            runner_id = %request.runner_id,
            data_size = participant.data_size,
            "model update stored"
        );

        self.check_round_completion(&mut session, &round).await?;
        Ok(participant)
    }

    /// Aggregate once every participant on the round has completed.
    async fn check_round_completion(
        &self,
        session: &mut FlSession,
        round: &FlRound,
    ) -> DomainResult<()> {
        let participants = self.repo.list_participants(round.id).await?;
        let total = participants.len();
        let completed = participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Completed)
            .count();

        tracing::debug!(
            session_id = %session.id,
            round = round.round_number,
            completed,
            total,
            "round completion check"
        );

        if total > 0 && completed >= total {
            // An aggregation failure fails the session but not the submit
            // that happened to cross the threshold; its update was stored.
            match self.aggregate_round(session, round.id).await {
                Ok(()) => {}
                Err(DomainError::AggregationFailed(reason)) => {
                    tracing::warn!(
                        session_id = %session.id,
                        round = round.round_number,
                        reason,
                        "round aggregation failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run the weighted federated average for a round and advance the
    /// session. The collecting → aggregating transition admits exactly one
    /// caller; losers return quietly.
    async fn aggregate_round(&self, session: &mut FlSession, round_id: Uuid) -> DomainResult<()> {
        if !self.repo.try_begin_aggregation(round_id).await? {
            tracing::debug!(round_id = %round_id, "aggregation already claimed");
            return Ok(());
        }

        let mut round = self
            .repo
            .get_round(round_id)
            .await?
            .ok_or(DomainError::RoundNotFound(round_id))?;

        let participants = self.repo.list_participants(round_id).await?;
        let updates: Vec<ModelUpdate> = participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Completed)
            .filter_map(|p| p.model_update.clone())
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        let aggregation = match aggregate_updates(&updates) {
            Ok(aggregation) => aggregation,
            Err(e) => {
                // The round stays aggregating as a tombstone; the session is
                // what callers observe.
                tracing::error!(
                    session_id = %session.id,
                    round = round.round_number,
                    error = %e,
                    "aggregation failed, failing session"
                );
                session.status = SessionStatus::Failed;
                session.updated_at = Utc::now();
                self.repo.update_session(session).await?;
                return Err(e);
            }
        };

        let bundle = serde_json::to_value(&aggregation)?;
        round.aggregation = Some(bundle.clone());
        round.status = RoundStatus::Completed;
        round.completed_at = Some(Utc::now());
        round.updated_at = Utc::now();
        self.repo.update_round(&round).await?;

        session.global_model = Some(bundle);
        session.updated_at = Utc::now();
        self.repo.update_session(session).await?;

        tracing::info!(
            session_id = %session.id,
            round = round.round_number,
            participants = aggregation.metrics.participant_count,
            average_loss = aggregation.metrics.average_loss,
            convergence = aggregation.metrics.convergence,
            "round aggregated"
        );

        self.start_next_round(session).await
    }

    async fn complete_session(&self, session: &mut FlSession) -> DomainResult<()> {
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        session.updated_at = Utc::now();
        self.repo.update_session(session).await?;
        tracing::info!(session_id = %session.id, rounds = session.current_round, "session completed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_session(&self, session_id: Uuid) -> DomainResult<FlSession> {
        self.repo
            .get_session(session_id)
            .await?
            .ok_or(DomainError::SessionNotFound(session_id))
    }

    pub async fn list_sessions(&self) -> DomainResult<Vec<FlSession>> {
        self.repo.list_sessions().await
    }

    /// The trained model bundle; fails while the session has no global model.
    pub async fn get_trained_model(&self, session_id: Uuid) -> DomainResult<TrainedModel> {
        let session = self.get_session(session_id).await?;
        let model_data = session.global_model.clone().ok_or_else(|| {
            DomainError::Conflict(format!("session {session_id} has no trained model yet"))
        })?;

        Ok(TrainedModel {
            session_id: session.id,
            name: session.name,
            model_type: session.model_type,
            status: session.status.as_str().to_string(),
            total_rounds: session.total_rounds,
            completed_at: session.completed_at,
            model_data,
        })
    }
}
