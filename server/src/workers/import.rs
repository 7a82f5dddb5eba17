use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model::import::{ImportBatchResult, ImportStore, NewImport};
use crate::model::lead::{LeadPatch, LeadStore, NewLead};
use crate::progress::{ProgressKind, ProgressPatch, ProgressStatus, ProgressTracker};
use crate::queue::{JobContext, JobError, JobHandler, JobOptions, NewJob, Queue};

pub const IMPORT_JOB_NAME: &str = "import-batch";
pub const CHUNK_SIZE: usize = 1_000;
/// Soft smoothing between chunk jobs.
const INTER_BATCH_DELAY_MS: u64 = 100;
const PROGRESS_EVERY: usize = 100;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
        .expect("email regex is valid")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobPayload {
    pub workspace_id: String,
    pub import_id: Uuid,
    pub batch_id: Uuid,
    pub batch_index: usize,
    pub total_batches: usize,
    pub records: Vec<ImportRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportStarted {
    pub import_id: Uuid,
    pub total_records: usize,
    pub total_batches: usize,
}

/// Enqueue-side of contact import: chunk, record, fan out.
#[derive(Clone)]
pub struct ImportService {
    queue: Queue,
    progress: ProgressTracker,
    imports: Arc<dyn ImportStore>,
}

impl ImportService {
    pub fn new(queue: Queue, progress: ProgressTracker, imports: Arc<dyn ImportStore>) -> Self {
        Self {
            queue,
            progress,
            imports,
        }
    }

    pub async fn start_import(
        &self,
        workspace_id: &str,
        records: Vec<ImportRecord>,
    ) -> AppResult<ImportStarted> {
        if records.is_empty() {
            return Err(AppError::Validation("no records to import".to_string()));
        }

        let import_id = Uuid::new_v4();
        let total_records = records.len();
        let chunks: Vec<Vec<ImportRecord>> = records
            .chunks(CHUNK_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = chunks.len();

        self.imports
            .create(NewImport {
                id: import_id,
                workspace_id: workspace_id.to_string(),
                total_records: total_records as i32,
                total_batches: total_batches as i32,
            })
            .await?;

        self.progress
            .create(
                &import_id.to_string(),
                ProgressKind::Import,
                workspace_id,
                total_records as u32,
                Some(serde_json::json!({ "total_batches": total_batches })),
            )
            .await?;
        self.progress
            .update(
                &import_id.to_string(),
                ProgressPatch {
                    status: Some(ProgressStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;

        let jobs: Vec<NewJob> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, records)| {
                let payload = ImportJobPayload {
                    workspace_id: workspace_id.to_string(),
                    import_id,
                    batch_id: Uuid::new_v4(),
                    batch_index: index,
                    total_batches,
                    records,
                };
                NewJob {
                    name: IMPORT_JOB_NAME.to_string(),
                    payload: serde_json::to_value(&payload).expect("payload serializes"),
                    opts: JobOptions {
                        priority: -(index as i32),
                        delay: Duration::from_millis(index as u64 * INTER_BATCH_DELAY_MS),
                        ..JobOptions::default()
                    },
                }
            })
            .collect();

        self.queue.add_bulk(jobs)?;
        tracing::info!(
            "Import {} started for {}: {} records in {} batches",
            import_id,
            workspace_id,
            total_records,
            total_batches
        );

        Ok(ImportStarted {
            import_id,
            total_records,
            total_batches,
        })
    }

    /// Idempotent: cancelling twice reports the same outcome.
    pub async fn cancel(&self, workspace_id: &str, import_id: Uuid) -> AppResult<()> {
        let import = self
            .imports
            .get(import_id)
            .await?
            .filter(|import| import.workspace_id == workspace_id)
            .ok_or_else(|| AppError::NotFound(format!("import {import_id} not found")))?;

        if import.status == "cancelled" {
            return Ok(());
        }

        let removed = self.queue.remove_matching(|job| {
            serde_json::from_value::<ImportJobPayload>(job.payload.clone())
                .map(|payload| payload.import_id == import_id)
                .unwrap_or(false)
        });
        self.imports.set_status(import_id, "cancelled").await?;
        self.progress
            .update(
                &import_id.to_string(),
                ProgressPatch {
                    status: Some(ProgressStatus::Cancelled),
                    message: Some("import cancelled".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!("Import {} cancelled, {} jobs removed", import_id, removed);
        Ok(())
    }
}

/// Per-chunk handler: validate, dedup against existing leads, upsert.
/// Record-level failures are collected, never fatal for the batch.
pub struct ImportHandler {
    leads: Arc<dyn LeadStore>,
    imports: Arc<dyn ImportStore>,
    progress: ProgressTracker,
}

impl ImportHandler {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        imports: Arc<dyn ImportStore>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            leads,
            imports,
            progress,
        }
    }

    async fn upsert_record(
        &self,
        workspace_id: &str,
        record: &ImportRecord,
    ) -> Result<(), String> {
        if !is_valid_email(&record.email) {
            return Err(format!("Invalid email format: {}", record.email));
        }

        let existing = self
            .leads
            .find_by_email(workspace_id, &record.email)
            .await
            .map_err(|e| format!("Lookup failed for {}: {}", record.email, e))?;

        match existing {
            Some(lead) => self
                .leads
                .update_fields(
                    lead.id,
                    LeadPatch {
                        name: record.name.clone(),
                        phone: record.phone.clone(),
                        tags: record.tags.clone(),
                        metadata: record.metadata.clone(),
                    },
                )
                .await
                .map_err(|e| format!("Update failed for {}: {}", record.email, e)),
            None => self
                .leads
                .insert(NewLead {
                    workspace_id: workspace_id.to_string(),
                    email: record.email.clone(),
                    name: record.name.clone(),
                    phone: record.phone.clone(),
                    tags: record.tags.clone().unwrap_or_default(),
                    metadata: record
                        .metadata
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({})),
                    source: "import".to_string(),
                    status: "active".to_string(),
                })
                .await
                .map(|_| ())
                .map_err(|e| format!("Insert failed for {}: {}", record.email, e)),
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for ImportHandler {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let payload: ImportJobPayload = ctx.parse_payload()?;
        let run_id = payload.import_id.to_string();

        // a cancel may have landed between enqueue and dispatch
        match self.imports.get(payload.import_id).await {
            Ok(Some(import)) if import.status == "cancelled" => {
                return Err(JobError::cancelled());
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(JobError::permanent(format!(
                    "import {} does not exist",
                    payload.import_id
                )))
            }
            Err(e) => return Err(JobError::transient(e.to_string())),
        }

        let total = payload.records.len();
        let mut processed = 0i32;
        let mut failed = 0i32;
        let mut errors: Vec<String> = Vec::new();

        for (index, record) in payload.records.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(JobError::cancelled());
            }

            match self.upsert_record(&payload.workspace_id, record).await {
                Ok(()) => processed += 1,
                Err(message) => {
                    failed += 1;
                    errors.push(message);
                }
            }

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                let pct = (done as f64 / total.max(1) as f64 * 100.0) as u8;
                ctx.report_progress(
                    pct,
                    &format!("batch {}/{}", payload.batch_index + 1, payload.total_batches),
                    Some(serde_json::json!({
                        "processed": processed,
                        "failed": failed,
                        "total": total,
                        "current_batch": payload.batch_index,
                        "total_batches": payload.total_batches,
                        "errors": errors.len(),
                    })),
                );
            }
        }

        self.imports
            .upsert_batch(ImportBatchResult {
                import_id: payload.import_id,
                batch_index: payload.batch_index as i32,
                processed,
                failed,
                errors: errors.clone(),
            })
            .await
            .map_err(|e| JobError::transient(format!("batch upsert failed: {e}")))?;

        let aggregate = self
            .imports
            .aggregate(payload.import_id)
            .await
            .map_err(|e| JobError::transient(format!("aggregate failed: {e}")))?;

        let finished = aggregate.completed_batches as usize >= payload.total_batches;
        if finished {
            self.imports
                .set_status(payload.import_id, "completed")
                .await
                .map_err(|e| JobError::transient(format!("status update failed: {e}")))?;
            tracing::info!(
                "Import {} completed: {} processed, {} failed",
                run_id,
                aggregate.processed,
                aggregate.failed
            );
        }

        let mut patch = ProgressPatch {
            processed: Some(aggregate.processed.max(0) as u32),
            failed: Some(aggregate.failed.max(0) as u32),
            message: Some(format!(
                "{}/{} batches complete",
                aggregate.completed_batches, payload.total_batches
            )),
            ..Default::default()
        };
        if !errors.is_empty() {
            patch.errors = Some(errors.clone());
        }
        if finished {
            patch.status = Some(ProgressStatus::Completed);
        }
        if let Err(e) = self.progress.update(&run_id, patch).await {
            // progress failures never fail the batch
            tracing::error!("Progress update failed for import {}: {}", run_id, e);
        }

        Ok(serde_json::json!({
            "batch_index": payload.batch_index,
            "processed": processed,
            "failed": failed,
            "errors": errors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_syntax_check() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.domain.co"));
        assert!(!is_valid_email("nope"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("a @x.com"));
    }
}
