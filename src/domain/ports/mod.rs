//! Ports: the traits the service layer depends on and the adapters implement.

pub mod federated_repository;
pub mod ledger;
pub mod prompt_repository;
pub mod reputation_repository;
pub mod runner_repository;
pub mod task_repository;

pub use federated_repository::FederatedRepository;
pub use ledger::LedgerClient;
pub use prompt_repository::PromptRepository;
pub use reputation_repository::ReputationRepository;
pub use runner_repository::{HeartbeatOutcome, RunnerRepository};
pub use task_repository::TaskRepository;
