use chrono::Utc;
use entity::{contact_import, import_batch, prelude::*};
use sea_orm::sea_query::OnConflict;
use sea_orm::{entity::*, query::*, ActiveValue, DatabaseConnection, FromQueryResult};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewImport {
    pub id: Uuid,
    pub workspace_id: String,
    pub total_records: i32,
    pub total_batches: i32,
}

/// Per-batch outcome, keyed by `(import_id, batch_index)` so a retried
/// batch overwrites its own row instead of double counting.
#[derive(Debug, Clone)]
pub struct ImportBatchResult {
    pub import_id: Uuid,
    pub batch_index: i32,
    pub processed: i32,
    pub failed: i32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportAggregate {
    pub completed_batches: i32,
    pub processed: i64,
    pub failed: i64,
}

#[async_trait::async_trait]
pub trait ImportStore: Send + Sync {
    async fn create(&self, import: NewImport) -> AppResult<()>;
    async fn get(&self, import_id: Uuid) -> AppResult<Option<contact_import::Model>>;
    async fn set_status(&self, import_id: Uuid, status: &str) -> AppResult<()>;
    async fn upsert_batch(&self, batch: ImportBatchResult) -> AppResult<()>;
    /// Totals across the batch rows written so far.
    async fn aggregate(&self, import_id: Uuid) -> AppResult<ImportAggregate>;
}

pub struct ImportCtrl {
    pub conn: DatabaseConnection,
}

#[async_trait::async_trait]
impl ImportStore for ImportCtrl {
    async fn create(&self, import: NewImport) -> AppResult<()> {
        let now = Utc::now();
        ContactImport::insert(contact_import::ActiveModel {
            id: ActiveValue::Set(import.id),
            workspace_id: ActiveValue::Set(import.workspace_id),
            total_records: ActiveValue::Set(import.total_records),
            total_batches: ActiveValue::Set(import.total_batches),
            completed_batches: ActiveValue::Set(0),
            status: ActiveValue::Set("processing".to_string()),
            created_at: ActiveValue::Set(now.into()),
            updated_at: ActiveValue::Set(now.into()),
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn get(&self, import_id: Uuid) -> AppResult<Option<contact_import::Model>> {
        Ok(ContactImport::find_by_id(import_id).one(&self.conn).await?)
    }

    async fn set_status(&self, import_id: Uuid, status: &str) -> AppResult<()> {
        ContactImport::update(contact_import::ActiveModel {
            id: ActiveValue::Set(import_id),
            status: ActiveValue::Set(status.to_string()),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn upsert_batch(&self, batch: ImportBatchResult) -> AppResult<()> {
        ImportBatch::insert(import_batch::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            import_id: ActiveValue::Set(batch.import_id),
            batch_index: ActiveValue::Set(batch.batch_index),
            processed: ActiveValue::Set(batch.processed),
            failed: ActiveValue::Set(batch.failed),
            errors: ActiveValue::Set(serde_json::json!(batch.errors)),
            created_at: ActiveValue::Set(Utc::now().into()),
        })
        .on_conflict(
            OnConflict::columns([
                import_batch::Column::ImportId,
                import_batch::Column::BatchIndex,
            ])
            .update_columns([
                import_batch::Column::Processed,
                import_batch::Column::Failed,
                import_batch::Column::Errors,
            ])
            .to_owned(),
        )
        .exec(&self.conn)
        .await?;

        // keep the denormalized batch counter in step
        let aggregate = self.aggregate(batch.import_id).await?;
        ContactImport::update(contact_import::ActiveModel {
            id: ActiveValue::Set(batch.import_id),
            completed_batches: ActiveValue::Set(aggregate.completed_batches),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn aggregate(&self, import_id: Uuid) -> AppResult<ImportAggregate> {
        #[derive(FromQueryResult)]
        struct Totals {
            batches: i64,
            processed: Option<i64>,
            failed: Option<i64>,
        }

        let totals = ImportBatch::find()
            .filter(import_batch::Column::ImportId.eq(import_id))
            .select_only()
            .column_as(import_batch::Column::Id.count(), "batches")
            .column_as(import_batch::Column::Processed.sum(), "processed")
            .column_as(import_batch::Column::Failed.sum(), "failed")
            .into_model::<Totals>()
            .one(&self.conn)
            .await?;

        Ok(totals
            .map(|t| ImportAggregate {
                completed_batches: t.batches as i32,
                processed: t.processed.unwrap_or(0),
                failed: t.failed.unwrap_or(0),
            })
            .unwrap_or_default())
    }
}
