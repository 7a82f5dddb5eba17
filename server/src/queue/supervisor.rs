use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::shared_store::SharedStore;

use super::engine::{QueueEngine, QueueStats};
use super::job::JobState;

pub const IMPORT_QUEUE: &str = "contact-import";
pub const EMAIL_QUEUE: &str = "email-send";

/// Pub/sub channel the CLI uses to reach a running supervisor.
pub const CONTROL_CHANNEL: &str = "queue:control";
/// Mirrored snapshot the CLI reads for `workers status`.
pub const WORKERS_STATUS_KEY: &str = "workers:status";

const STATUS_MIRROR_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Clean,
    /// Drain and stop the whole worker process. `queue` is ignored.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: ControlAction,
    pub queue: String,
    pub grace_ms: Option<u64>,
    pub state: Option<JobState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub queues: HashMap<String, QueueStats>,
}

/// Process-level coordinator for the worker fleet: owns the queue engine
/// lifecycle, mirrors status for operators, listens for control messages
/// and drains on shutdown.
#[derive(Clone)]
pub struct WorkerSupervisor {
    engine: QueueEngine,
    store: SharedStore,
    shutdown_grace: Duration,
    started_at: DateTime<Utc>,
}

impl WorkerSupervisor {
    pub fn new(engine: QueueEngine, store: SharedStore, shutdown_grace: Duration) -> Self {
        Self {
            engine,
            store,
            shutdown_grace,
            started_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            running: true,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            queues: self.engine.stats_all(),
        }
    }

    pub fn stats(&self) -> HashMap<String, QueueStats> {
        self.engine.stats_all()
    }

    pub fn pause(&self, queue: &str) -> AppResult<()> {
        self.engine
            .get(queue)
            .ok_or_else(|| AppError::NotFound(format!("queue {queue} not found")))?
            .pause();
        Ok(())
    }

    pub fn resume(&self, queue: &str) -> AppResult<()> {
        self.engine
            .get(queue)
            .ok_or_else(|| AppError::NotFound(format!("queue {queue} not found")))?
            .resume();
        Ok(())
    }

    pub fn clean(&self, queue: &str, grace: Duration, state: JobState) -> AppResult<usize> {
        let queue = self
            .engine
            .get(queue)
            .ok_or_else(|| AppError::NotFound(format!("queue {queue} not found")))?;
        Ok(queue.clean(grace, state))
    }

    /// Mirror the supervisor status into the shared store so the CLI can
    /// answer `workers status` without talking to this process.
    pub fn spawn_status_mirror(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_MIRROR_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let status = supervisor.status();
                if let Ok(payload) = serde_json::to_string(&status) {
                    supervisor
                        .store
                        .setex(WORKERS_STATUS_KEY, &payload, 30)
                        .await;
                }
            }
        })
    }

    /// Apply `queue pause|resume|clean` messages published by the CLI.
    pub fn spawn_control_listener(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut subscription = supervisor.store.subscribe(CONTROL_CHANNEL).await;
            while let Some(raw) = subscription.recv().await {
                let message: ControlMessage = match serde_json::from_str(&raw) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed control message: {}", e);
                        continue;
                    }
                };
                supervisor.apply(message);
            }
            tracing::info!("Control channel closed");
        })
    }

    fn apply(&self, message: ControlMessage) {
        tracing::info!(
            "Control message: {:?} on queue {}",
            message.action,
            message.queue
        );
        let outcome = match message.action {
            ControlAction::Pause => self.pause(&message.queue),
            ControlAction::Resume => self.resume(&message.queue),
            ControlAction::Clean => {
                let grace = Duration::from_millis(message.grace_ms.unwrap_or(0));
                let state = message.state.unwrap_or(JobState::Completed);
                self.clean(&message.queue, grace, state).map(|removed| {
                    tracing::info!("Cleaned {} jobs from {}", removed, message.queue);
                })
            }
            ControlAction::Shutdown => {
                let supervisor = self.clone();
                tokio::spawn(async move {
                    supervisor.shutdown().await;
                    std::process::exit(0);
                });
                Ok(())
            }
        };
        if let Err(e) = outcome {
            tracing::warn!("Control message failed: {}", e);
        }
    }

    /// Drain active jobs up to the configured grace, then force-close.
    pub async fn shutdown(&self) {
        tracing::info!(
            "Supervisor shutting down, draining for up to {:?}",
            self.shutdown_grace
        );
        self.engine.shutdown(self.shutdown_grace).await;

        let status = SupervisorStatus {
            running: false,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            queues: self.engine.stats_all(),
        };
        if let Ok(payload) = serde_json::to_string(&status) {
            self.store.setex(WORKERS_STATUS_KEY, &payload, 300).await;
        }
        tracing::info!("Supervisor stopped");
    }
}
