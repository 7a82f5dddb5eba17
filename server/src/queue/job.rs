use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    Stalled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Lower value dispatches first.
    pub priority: i32,
    pub delay: Duration,
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            attempts: 3,
            backoff_base: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub opts: JobOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub delay_until: Option<DateTime<Utc>>,
    /// Attempts started so far (1 on the first run).
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Job {
    /// Exponential backoff for the retry after the current attempt:
    /// `base * 2^(attempt_index)` where the first failure has index 0.
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.attempts.saturating_sub(1).min(20);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1 << exponent))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Retried under the job's attempt budget.
    Transient,
    /// Never retried.
    Permanent,
    /// Terminal non-error: the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobError {
    pub message: String,
    pub kind: JobErrorKind,
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: JobErrorKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: JobErrorKind::Permanent,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "job cancelled".to_string(),
            kind: JobErrorKind::Cancelled,
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        JobError::transient(format!("{error:#}"))
    }
}

pub(crate) type ProgressFn = Arc<dyn Fn(u8, &str, Option<serde_json::Value>) + Send + Sync>;

/// Everything a handler sees about the job it is running. The progress
/// callback renews the stall heartbeat; the cancel token trips at the next
/// suspension point when the run is being torn down.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: ProgressFn,
}

impl JobContext {
    pub fn report_progress(&self, pct: u8, message: &str, data: Option<serde_json::Value>) {
        (self.progress)(pct.min(100), message, data);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| JobError::permanent(format!("malformed job payload: {e}")))
    }
}

#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError>;
}

/// Handler registry entry: jobs dispatch on `(queue, job name)`, with `*`
/// as the per-queue catch-all.
pub(crate) type HandlerMap = HashMap<String, Arc<dyn JobHandler>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut job = Job {
            id: "j".to_string(),
            queue: "q".to_string(),
            name: "n".to_string(),
            payload: serde_json::Value::Null,
            priority: 0,
            delay_until: None,
            attempts: 1,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            state: JobState::Failed,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
            seq: 0,
        };
        assert_eq!(job.backoff_delay(), Duration::from_millis(2_000));
        job.attempts = 2;
        assert_eq!(job.backoff_delay(), Duration::from_millis(4_000));
        job.attempts = 3;
        assert_eq!(job.backoff_delay(), Duration::from_millis(8_000));
    }
}
