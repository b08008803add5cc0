//! Service layer: the coordinator's moving parts.

pub mod aggregation;
pub mod dispatcher;
pub mod federated;
pub mod heartbeat_monitor;
pub mod nonce;
pub mod prompt_queue;
pub mod reward;
pub mod webhook;
pub mod webhook_hub;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use federated::{CreateSessionRequest, FlCoordinator, SubmitUpdateRequest, TrainedModel};
pub use heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig};
pub use nonce::NonceSource;
pub use prompt_queue::{PromptQueue, PromptQueueConfig};
pub use reward::{RewardCalculator, RewardRates};
pub use webhook::WebhookNotifier;
pub use webhook_hub::WebhookHub;
