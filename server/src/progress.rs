//! Authoritative per-run progress records: write-through cache in the
//! shared store, durable row behind it, real-time fan-out over pub/sub.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AppError, AppResult};
use crate::model::progress_record::ProgressStore;
use crate::shared_store::{SharedStore, Subscription};

const CACHE_TTL_SECS: u64 = 3_600;
pub const LIST_LIMIT: u64 = 50;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressKind {
    Import,
    Email,
    Campaign,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed | ProgressStatus::Failed | ProgressStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub id: String,
    pub kind: ProgressKind,
    pub workspace_id: String,
    pub status: ProgressStatus,
    pub progress: u8,
    pub total: u32,
    pub processed: u32,
    pub failed: u32,
    pub message: String,
    pub metadata: serde_json::Value,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. Counters are absolute values computed by the single
/// producer of the run; the tracker never accumulates on its own.
#[derive(Debug, Clone, Default)]
pub struct ProgressPatch {
    pub progress: Option<u8>,
    pub processed: Option<u32>,
    pub failed: Option<u32>,
    pub message: Option<String>,
    pub status: Option<ProgressStatus>,
    pub metadata: Option<serde_json::Value>,
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: SharedStore,
    repo: Arc<dyn ProgressStore>,
}

impl ProgressTracker {
    pub fn new(store: SharedStore, repo: Arc<dyn ProgressStore>) -> Self {
        Self { store, repo }
    }

    fn cache_key(id: &str) -> String {
        format!("progress:{id}")
    }

    fn channel(workspace_id: &str) -> String {
        format!("progress:{workspace_id}")
    }

    /// Start (or restart) a run record. Re-creating an id resets its
    /// counters; that is the one sanctioned non-monotonic transition.
    pub async fn create(
        &self,
        id: &str,
        kind: ProgressKind,
        workspace_id: &str,
        total: u32,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<Progress> {
        let now = Utc::now();
        let record = Progress {
            id: id.to_string(),
            kind,
            workspace_id: workspace_id.to_string(),
            status: ProgressStatus::Pending,
            progress: 0,
            total,
            processed: 0,
            failed: 0,
            message: String::new(),
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            errors: Vec::new(),
            started_at: now,
            ended_at: None,
            updated_at: now,
        };

        self.write_through(&record).await;
        self.repo.upsert(&record).await?;
        self.publish(&record).await;
        Ok(record)
    }

    pub async fn update(&self, id: &str, patch: ProgressPatch) -> AppResult<Progress> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("progress record {id} not found")))?;

        // terminal records are frozen; only create() starts a new run
        if record.status.is_terminal() {
            tracing::debug!("Ignoring update to terminal progress record {}", id);
            return Ok(record);
        }

        if let Some(processed) = patch.processed {
            record.processed = processed;
        }
        if let Some(failed) = patch.failed {
            record.failed = failed;
        }
        if let Some(message) = patch.message {
            record.message = message;
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }
        if let Some(errors) = patch.errors {
            record.errors = errors;
        }
        if let Some(status) = patch.status {
            record.status = status;
            if status.is_terminal() && record.ended_at.is_none() {
                record.ended_at = Some(Utc::now());
            }
        }

        let next_progress = match patch.progress {
            Some(explicit) => explicit.min(100),
            None if record.total > 0 => {
                let done = record.processed + record.failed;
                (f64::from(done) / f64::from(record.total) * 100.0).round() as u8
            }
            None => record.progress,
        };
        // monotonic within a run; only create() may reset
        record.progress = record.progress.max(next_progress.min(100));
        record.updated_at = Utc::now();

        self.write_through(&record).await;
        if let Err(e) = self.repo.upsert(&record).await {
            // cache stays authoritative for the TTL
            tracing::error!("Durable progress write failed for {}: {}", id, e);
        }
        self.publish(&record).await;
        Ok(record)
    }

    /// Read-through: cache first, then the durable store.
    pub async fn get(&self, id: &str) -> AppResult<Option<Progress>> {
        if let Some(raw) = self.store.get(&Self::cache_key(id)).await {
            match serde_json::from_str(&raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => tracing::warn!("Discarding bad progress cache entry for {}: {}", id, e),
            }
        }

        let record = self.repo.get(id).await?;
        if let Some(record) = &record {
            self.write_through(record).await;
        }
        Ok(record)
    }

    pub async fn list_by_owner(&self, workspace_id: &str) -> AppResult<Vec<Progress>> {
        self.repo.list_by_workspace(workspace_id, LIST_LIMIT).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.del(&Self::cache_key(id)).await;
        self.repo.delete(id).await
    }

    pub async fn cleanup_older_than(&self, age: Duration) -> AppResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        self.repo.delete_older_than(cutoff).await
    }

    pub async fn stats(&self, workspace_id: &str) -> AppResult<ProgressStats> {
        self.repo.stats(workspace_id).await
    }

    /// Live updates for every run owned by the workspace.
    pub async fn subscribe(&self, workspace_id: &str) -> Subscription {
        self.store.subscribe(&Self::channel(workspace_id)).await
    }

    async fn write_through(&self, record: &Progress) {
        match serde_json::to_string(record) {
            Ok(payload) => {
                self.store
                    .setex(&Self::cache_key(&record.id), &payload, CACHE_TTL_SECS)
                    .await;
            }
            Err(e) => tracing::error!("Could not serialize progress {}: {}", record.id, e),
        }
    }

    async fn publish(&self, record: &Progress) {
        // publish failures are logged inside the store and swallowed here
        if let Ok(payload) = serde_json::to_string(record) {
            self.store
                .publish(&Self::channel(&record.workspace_id), &payload)
                .await;
        }
    }
}
