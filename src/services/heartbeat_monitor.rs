//! Heartbeat monitor background daemon.
//!
//! Periodically sweeps the runner registry, transitioning runners whose last
//! heartbeat is older than the timeout to offline and clearing their task
//! bindings. A sweep that affects any runner wakes the dispatcher so tasks
//! bound to now-offline runners can be reclaimed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;

use crate::domain::errors::DomainResult;
use crate::domain::ports::RunnerRepository;

/// Configuration for the heartbeat monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// Interval between sweeps.
    pub check_interval: Duration,
    /// How long a runner may stay silent before it is marked offline.
    pub heartbeat_timeout: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(300),
        }
    }
}

impl HeartbeatMonitorConfig {
    /// Build from the configured timeout in minutes.
    pub fn with_timeout_minutes(minutes: u64) -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(minutes * 60),
            ..Default::default()
        }
    }
}

pub struct HeartbeatMonitor {
    registry: Arc<dyn RunnerRepository>,
    config: HeartbeatMonitorConfig,
    /// Wakes the dispatcher's pending sweep after an effective sweep.
    dispatcher_wake: Option<UnboundedSender<()>>,
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<dyn RunnerRepository>, config: HeartbeatMonitorConfig) -> Self {
        Self {
            registry,
            config,
            dispatcher_wake: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire the dispatcher wake signal.
    pub fn with_dispatcher_wake(mut self, wake: UnboundedSender<()>) -> Self {
        self.dispatcher_wake = Some(wake);
        self
    }

    /// Start the monitor loop. Idempotent: a second start is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("heartbeat monitor already running");
            return;
        }
        self.stop_flag.store(false, Ordering::Release);

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                check_interval_s = monitor.config.check_interval.as_secs(),
                timeout_s = monitor.config.heartbeat_timeout.as_secs(),
                "heartbeat monitor started"
            );
            let mut ticker = interval(monitor.config.check_interval);
            // The first tick fires immediately; skip it so a fresh start
            // does not race registrations that are still in flight.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if monitor.stop_flag.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = monitor.run_sweep().await {
                    tracing::error!(error = %e, "heartbeat sweep failed");
                }
            }

            monitor.running.store(false, Ordering::Release);
            tracing::info!("heartbeat monitor stopped");
        });
    }

    /// Request the monitor to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One sweep cycle; public for tests and manual invocation.
    pub async fn run_sweep(&self) -> DomainResult<Vec<String>> {
        let affected = self.registry.sweep_offline(self.config.heartbeat_timeout).await?;

        if !affected.is_empty() {
            tracing::warn!(
                count = affected.len(),
                runners = ?affected,
                "runners marked offline by heartbeat sweep"
            );
            if let Some(wake) = &self.dispatcher_wake {
                let _ = wake.send(());
            }
        }

        Ok(affected)
    }
}
