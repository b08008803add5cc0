//! The dispatcher: task lifecycle, runner binding, and stall recovery.
//!
//! A task is created pending, bound to exactly one idle runner, and notified
//! over the runner's webhook. The binding protocol writes the task side
//! first, then atomically claims the runner; the claim losing a race reverts
//! the task side. Notification failures never unbind: if the runner stays
//! silent, the stall sweep reclaims the task.
//!
//! Two periodic safety nets run alongside the fast paths:
//! - the stall sweep returns orphaned running tasks to pending and marks
//!   their runners offline;
//! - the pending sweep greedily pairs pending tasks with idle runners, and
//!   is also woken whenever the registry reports a runner became available.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Runner, RunnerStatus, Task, TaskResult, TaskStatus, TaskType};
use crate::domain::ports::{LedgerClient, ReputationRepository, RunnerRepository, TaskRepository};
use crate::services::nonce::NonceSource;
use crate::services::reward::RewardCalculator;
use crate::services::webhook::{task_payload, WebhookNotifier, EVENT_AVAILABLE_TASKS};
use crate::services::webhook_hub::WebhookHub;

/// Timing knobs for the dispatcher and its sweeps.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Period of the stall sweep.
    pub stall_sweep_interval: Duration,
    /// How long a running task may go without updates before it is
    /// considered stalled.
    pub stall_timeout: Duration,
    /// Period of the pending sweep.
    pub pending_sweep_interval: Duration,
    /// Bound on a single webhook notification attempt.
    pub notify_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stall_sweep_interval: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(300),
            pending_sweep_interval: Duration::from_secs(30),
            notify_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Dispatcher {
    tasks: Arc<dyn TaskRepository>,
    runners: Arc<dyn RunnerRepository>,
    reputation: Arc<dyn ReputationRepository>,
    ledger: Arc<dyn LedgerClient>,
    hub: Option<Arc<WebhookHub>>,
    nonce: NonceSource,
    reward: RewardCalculator,
    notifier: WebhookNotifier,
    config: DispatcherConfig,
    /// Assignments currently in flight, keyed by (task, runner). Concurrent
    /// duplicates observe the guard and return success without action.
    in_flight: Mutex<HashSet<(Uuid, String)>>,
    wake_tx: UnboundedSender<()>,
    wake_rx: tokio::sync::Mutex<Option<UnboundedReceiver<()>>>,
    stop_flag: Arc<AtomicBool>,
    running: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        runners: Arc<dyn RunnerRepository>,
        reputation: Arc<dyn ReputationRepository>,
        ledger: Arc<dyn LedgerClient>,
        config: DispatcherConfig,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            tasks,
            runners,
            reputation,
            ledger,
            hub: None,
            nonce: NonceSource::new(),
            reward: RewardCalculator::new(),
            notifier: WebhookNotifier::new(),
            config,
            in_flight: Mutex::new(HashSet::new()),
            wake_tx,
            wake_rx: tokio::sync::Mutex::new(Some(wake_rx)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Attach the webhook hub notified after task creation.
    pub fn with_hub(mut self, hub: Arc<WebhookHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// A handle other components use to wake the pending sweep.
    pub fn wake_handle(&self) -> UnboundedSender<()> {
        self.wake_tx.clone()
    }

    /// Wake the pending sweep out of band.
    pub fn wake(&self) {
        let _ = self.wake_tx.send(());
    }

    // ------------------------------------------------------------------
    // Task creation
    // ------------------------------------------------------------------

    /// Validate and persist a task, then attempt immediate assignment to the
    /// first compatible idle runner. Assignment failure leaves the task
    /// pending for the sweeps.
    pub async fn create_task(self: &Arc<Self>, task: Task) -> DomainResult<Task> {
        task.validate().map_err(DomainError::ValidationFailed)?;
        self.tasks.create(&task).await?;
        tracing::info!(task_id = %task.id, task_type = task.task_type.as_str(), "task created");

        self.notify_hub();

        if let Err(e) = self.try_immediate_assignment(&task).await {
            tracing::warn!(task_id = %task.id, error = %e, "immediate assignment failed, task stays pending");
        }

        self.tasks
            .get(task.id)
            .await?
            .ok_or(DomainError::TaskNotFound(task.id))
    }

    /// Validate and persist a task, then bind it to a specific runner. Used
    /// by the federated coordinator to route per-participant training tasks.
    pub async fn create_task_for_runner(
        self: &Arc<Self>,
        task: Task,
        device_id: &str,
    ) -> DomainResult<Task> {
        task.validate().map_err(DomainError::ValidationFailed)?;
        self.tasks.create(&task).await?;
        tracing::info!(task_id = %task.id, device_id, "task created for runner");

        if let Err(e) = self.assign_task(task.id, device_id).await {
            tracing::warn!(task_id = %task.id, device_id, error = %e, "directed assignment failed, task stays pending");
        }

        self.tasks
            .get(task.id)
            .await?
            .ok_or(DomainError::TaskNotFound(task.id))
    }

    async fn try_immediate_assignment(self: &Arc<Self>, task: &Task) -> DomainResult<()> {
        let candidates = self.runners.list_by_status(RunnerStatus::Online).await?;
        let Some(runner) = candidates
            .into_iter()
            .find(|r| r.is_available() && is_compatible(task, r))
        else {
            tracing::debug!(task_id = %task.id, "no idle runner available at creation");
            return Ok(());
        };

        self.assign_task(task.id, &runner.device_id).await
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Bind a pending task to a runner.
    ///
    /// Idempotent when the runner already holds the task; a conflict when
    /// the task has left pending or the runner owns other work. Concurrent
    /// calls for the same (task, runner) pair collapse into one attempt.
    pub async fn assign_task(&self, task_id: Uuid, device_id: &str) -> DomainResult<()> {
        let key = (task_id, device_id.to_string());
        {
            let mut in_flight = lock_unpoisoned(&self.in_flight);
            if !in_flight.insert(key.clone()) {
                tracing::debug!(task_id = %task_id, device_id, "duplicate assignment in flight");
                return Ok(());
            }
        }
        let _guard = InFlightGuard { set: &self.in_flight, key };

        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if task.runner_id == device_id {
            return Ok(());
        }

        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                return Err(DomainError::Conflict(format!("task {task_id} is already running")))
            }
            _ => {
                return Err(DomainError::Conflict(format!(
                    "task {task_id} is already {}",
                    task.status.as_str()
                )))
            }
        }

        if task.task_type == TaskType::Container
            && !task.environment.as_ref().is_some_and(|e| e.is_container())
        {
            return Err(DomainError::ValidationFailed(
                "container task requires a container-typed environment".to_string(),
            ));
        }

        let runner = self
            .runners
            .get(device_id)
            .await?
            .ok_or_else(|| DomainError::RunnerNotFound(device_id.to_string()))?;

        self.bind(&mut task, &runner).await
    }

    /// The two-step binding protocol: task side first, then the atomic
    /// runner claim, reverting the task side when the claim loses.
    async fn bind(&self, task: &mut Task, runner: &Runner) -> DomainResult<()> {
        task.runner_id = runner.device_id.clone();
        task.updated_at = Utc::now();
        self.tasks.update(task).await?;

        let claimed = self.runners.try_claim(&runner.device_id, task.id).await?;
        if !claimed {
            task.runner_id = String::new();
            task.updated_at = Utc::now();
            if let Err(e) = self.tasks.update(task).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to revert task binding");
            }
            return Err(DomainError::Conflict(format!(
                "runner {} already owns a task",
                runner.device_id
            )));
        }

        // The nonce lands in the same write that moves the task out of
        // pending, so no observable state has a dispatched task without one.
        task.nonce = self.nonce.generate();
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        self.tasks.update(task).await?;

        tracing::info!(task_id = %task.id, device_id = %runner.device_id, "task bound to runner");

        if let Err(e) = self.deliver_notification(runner, task).await {
            tracing::warn!(
                task_id = %task.id,
                device_id = %runner.device_id,
                error = %e,
                "task notification failed; the stall sweep reclaims if the runner stays silent"
            );
        }

        Ok(())
    }

    async fn deliver_notification(&self, runner: &Runner, task: &Task) -> DomainResult<()> {
        if runner.webhook.is_empty() {
            return Ok(());
        }
        self.notifier
            .deliver(
                &runner.webhook,
                &runner.device_id,
                EVENT_AVAILABLE_TASKS,
                &task_payload(task),
                self.config.notify_timeout,
            )
            .await
    }

    // ------------------------------------------------------------------
    // Result ingestion
    // ------------------------------------------------------------------

    /// Ingest a runner's result: unbind the runner, price the usage, persist
    /// the result, complete the task, and kick off settlement and backfill.
    pub async fn save_result(self: &Arc<Self>, mut result: TaskResult) -> DomainResult<TaskResult> {
        let mut task = self
            .tasks
            .get(result.task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(result.task_id))?;

        if matches!(task.status, TaskStatus::Failed | TaskStatus::NotVerified) {
            return Err(DomainError::Conflict(format!(
                "task {} no longer accepts results",
                task.id
            )));
        }

        let runner_id = [
            task.runner_id.as_str(),
            result.device_id.as_str(),
            result.solver_device_id.as_str(),
        ]
        .into_iter()
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            DomainError::ValidationFailed("result does not identify a runner".to_string())
        })?;

        self.unbind_runner(&runner_id).await?;

        result.reward = self.reward.calculate(&result.resource_usage);
        self.tasks.save_result(&result).await?;

        if !task.status.is_terminal() {
            let verified =
                task.nonce.is_empty() || result.nonce.is_empty() || result.nonce == task.nonce;
            if !verified {
                tracing::warn!(task_id = %task.id, "result nonce mismatch, marking not verified");
            }
            task.status = if verified { TaskStatus::Completed } else { TaskStatus::NotVerified };
            task.reward = result.reward;
            // runner_id stays for audit
            task.completed_at = Some(Utc::now());
            task.updated_at = Utc::now();
            self.tasks.update(&task).await?;
        }

        tracing::info!(
            task_id = %task.id,
            device_id = %runner_id,
            reward = result.reward,
            "result saved"
        );

        if let Err(e) = self
            .reputation
            .record_event(&runner_id, "task_completed", 1.0, Some(task.id))
            .await
        {
            tracing::warn!(device_id = %runner_id, error = %e, "failed to record reputation event");
        }

        let ledger = Arc::clone(&self.ledger);
        let settled = result.clone();
        tokio::spawn(async move {
            if let Err(e) = ledger.transfer_reward(&settled).await {
                tracing::warn!(result_id = %settled.id, error = %e, "ledger settlement failed");
            }
        });

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.backfill_from_runner(&runner_id).await {
                tracing::warn!(device_id = %runner_id, error = %e, "backfill after result failed");
            }
        });

        Ok(result)
    }

    /// Free the runner that delivered a result. When a concurrent writer
    /// re-binds it in the same instant, the intended state is re-applied
    /// once; anything after that is the next sweep's problem.
    async fn unbind_runner(&self, device_id: &str) -> DomainResult<()> {
        let Some(mut runner) = self.runners.get(device_id).await? else {
            tracing::warn!(device_id, "result from unknown runner, nothing to unbind");
            return Ok(());
        };

        runner.task_id = None;
        runner.status = RunnerStatus::Online;
        self.runners.update(&runner).await?;

        if let Some(check) = self.runners.get(device_id).await? {
            if check.task_id.is_some() || check.status != RunnerStatus::Online {
                tracing::warn!(device_id, "runner still bound after unbind, re-applying once");
                let mut again = check;
                again.task_id = None;
                again.status = RunnerStatus::Online;
                if let Err(e) = self.runners.update(&again).await {
                    tracing::warn!(device_id, error = %e, "re-apply failed, leaving for next sweep");
                }
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Backfill and sweeps
    // ------------------------------------------------------------------

    /// Re-use a freed runner on the oldest compatible pending task.
    pub async fn backfill_from_runner(&self, device_id: &str) -> DomainResult<()> {
        let Some(runner) = self.runners.get(device_id).await? else {
            return Ok(());
        };
        if !runner.is_available() {
            return Ok(());
        }

        let pending = self.tasks.list_by_status(TaskStatus::Pending).await?;
        for task in pending {
            if !is_compatible(&task, &runner) {
                continue;
            }
            match self.assign_task(task.id, device_id).await {
                Ok(()) => {
                    tracing::info!(task_id = %task.id, device_id, "backfilled pending task");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(task_id = %task.id, device_id, error = %e, "backfill attempt failed");
                }
            }
        }

        Ok(())
    }

    /// One pending-sweep cycle: greedily pair pending tasks (oldest first)
    /// with idle runners. Each runner is attempted at most once per sweep;
    /// each task sees at most one runner per sweep.
    pub async fn run_pending_sweep(&self) -> DomainResult<usize> {
        let pending = self.tasks.list_by_status(TaskStatus::Pending).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let idle: Vec<Runner> = self
            .runners
            .list_by_status(RunnerStatus::Online)
            .await?
            .into_iter()
            .filter(Runner::is_available)
            .collect();
        if idle.is_empty() {
            return Ok(0);
        }

        let mut assigned = 0usize;
        let mut runners = idle.into_iter();
        let mut current = runners.next();

        for task in pending {
            let Some(runner) = current.take() else { break };
            if !is_compatible(&task, &runner) {
                // Task skipped this sweep; the runner stays up for the next task.
                current = Some(runner);
                continue;
            }
            match self.assign_task(task.id, &runner.device_id).await {
                Ok(()) => assigned += 1,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, device_id = %runner.device_id, error = %e, "pending sweep assignment failed");
                }
            }
            current = runners.next();
        }

        if assigned > 0 {
            tracing::info!(assigned, "pending sweep paired tasks with runners");
        }
        Ok(assigned)
    }

    /// One stall-sweep cycle: reclaim running tasks whose runner went silent
    /// past the stall timeout.
    pub async fn run_stall_sweep(&self) -> DomainResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stall_timeout)
                .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;

        let stalled = self.tasks.list_stalled(cutoff).await?;
        let mut reclaimed = 0usize;

        for mut task in stalled {
            let device_id = task.runner_id.clone();
            tracing::warn!(task_id = %task.id, device_id = %device_id, "reclaiming stalled task");

            if !device_id.is_empty() {
                match self.runners.get(&device_id).await {
                    Ok(Some(mut runner)) => {
                        runner.status = RunnerStatus::Offline;
                        runner.task_id = None;
                        if let Err(e) = self.runners.update(&runner).await {
                            tracing::warn!(device_id = %device_id, error = %e, "failed to offline stalled runner");
                        }
                        if let Err(e) = self
                            .reputation
                            .record_event(&device_id, "task_stalled", -1.0, Some(task.id))
                            .await
                        {
                            tracing::warn!(device_id = %device_id, error = %e, "failed to record stall event");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(device_id = %device_id, error = %e, "failed to load stalled runner");
                    }
                }
            }

            task.status = TaskStatus::Pending;
            task.runner_id = String::new();
            task.updated_at = Utc::now();
            if let Err(e) = self.tasks.update(&task).await {
                tracing::warn!(task_id = %task.id, error = %e, "failed to reset stalled task");
                continue;
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, "stall sweep reset tasks to pending");
        }
        Ok(reclaimed)
    }

    // ------------------------------------------------------------------
    // Worker lifecycle
    // ------------------------------------------------------------------

    /// Start the stall and pending sweep loops. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("dispatcher sweeps already running");
            return;
        }
        self.stop_flag.store(false, Ordering::Release);

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(dispatcher.config.stall_sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if dispatcher.stop_flag.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = dispatcher.run_stall_sweep().await {
                    tracing::error!(error = %e, "stall sweep failed");
                }
            }
            tracing::info!("stall sweep stopped");
        });

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut wake_rx) = dispatcher.wake_rx.lock().await.take() else {
                tracing::error!("pending sweep wake receiver already taken");
                return;
            };
            let mut ticker = interval(dispatcher.config.pending_sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    signal = wake_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                    }
                }
                if dispatcher.stop_flag.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = dispatcher.run_pending_sweep().await {
                    tracing::error!(error = %e, "pending sweep failed");
                }
            }
            tracing::info!("pending sweep stopped");
        });

        tracing::info!("dispatcher sweeps started");
    }

    /// Request the sweep loops to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        // Nudge the pending loop so it observes the flag promptly.
        let _ = self.wake_tx.send(());
    }

    fn notify_hub(self: &Arc<Self>) {
        if let Some(hub) = &self.hub {
            let hub = Arc::clone(hub);
            tokio::spawn(async move {
                if let Err(e) = hub.notify_all().await {
                    tracing::warn!(error = %e, "webhook fan-out failed");
                }
            });
        }
    }
}

/// Whether a runner can take a task. Any idle online runner qualifies;
/// container tasks additionally require the task-side environment block.
fn is_compatible(task: &Task, runner: &Runner) -> bool {
    if !runner.is_available() {
        return false;
    }
    if task.task_type == TaskType::Container {
        return task.environment.as_ref().is_some_and(|e| e.is_container());
    }
    true
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Removes the (task, runner) key when an assignment attempt finishes.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<(Uuid, String)>>,
    key: (Uuid, String),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(self.set).remove(&self.key);
    }
}
