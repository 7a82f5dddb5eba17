use std::str::FromStr;

use chrono::{DateTime, Utc};
use entity::{prelude::*, progress_record};
use sea_orm::sea_query::OnConflict;
use sea_orm::{entity::*, query::*, ActiveValue, DatabaseConnection};

use crate::error::AppResult;
use crate::progress::{Progress, ProgressKind, ProgressStats, ProgressStatus};

#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    async fn upsert(&self, record: &Progress) -> AppResult<()>;
    async fn get(&self, id: &str) -> AppResult<Option<Progress>>;
    async fn list_by_workspace(&self, workspace_id: &str, limit: u64) -> AppResult<Vec<Progress>>;
    async fn delete(&self, id: &str) -> AppResult<()>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
    async fn stats(&self, workspace_id: &str) -> AppResult<ProgressStats>;
}

pub struct ProgressCtrl {
    pub conn: DatabaseConnection,
}

fn to_domain(model: progress_record::Model) -> Progress {
    Progress {
        kind: ProgressKind::from_str(&model.kind).unwrap_or(ProgressKind::Import),
        status: ProgressStatus::from_str(&model.status).unwrap_or(ProgressStatus::Pending),
        id: model.id,
        workspace_id: model.workspace_id,
        progress: model.progress.clamp(0, 100) as u8,
        total: model.total.max(0) as u32,
        processed: model.processed.max(0) as u32,
        failed: model.failed.max(0) as u32,
        message: model.message,
        metadata: model.metadata,
        errors: serde_json::from_value(model.errors).unwrap_or_default(),
        started_at: model.started_at.into(),
        ended_at: model.ended_at.map(Into::into),
        updated_at: model.updated_at.into(),
    }
}

fn to_active(record: &Progress) -> progress_record::ActiveModel {
    progress_record::ActiveModel {
        id: ActiveValue::Set(record.id.clone()),
        kind: ActiveValue::Set(record.kind.to_string()),
        workspace_id: ActiveValue::Set(record.workspace_id.clone()),
        status: ActiveValue::Set(record.status.to_string()),
        progress: ActiveValue::Set(i32::from(record.progress)),
        total: ActiveValue::Set(record.total as i32),
        processed: ActiveValue::Set(record.processed as i32),
        failed: ActiveValue::Set(record.failed as i32),
        message: ActiveValue::Set(record.message.clone()),
        metadata: ActiveValue::Set(record.metadata.clone()),
        errors: ActiveValue::Set(serde_json::json!(record.errors)),
        started_at: ActiveValue::Set(record.started_at.into()),
        ended_at: ActiveValue::Set(record.ended_at.map(Into::into)),
        updated_at: ActiveValue::Set(record.updated_at.into()),
    }
}

#[async_trait::async_trait]
impl ProgressStore for ProgressCtrl {
    async fn upsert(&self, record: &Progress) -> AppResult<()> {
        ProgressRecord::insert(to_active(record))
            .on_conflict(
                OnConflict::column(progress_record::Column::Id)
                    .update_columns([
                        progress_record::Column::Kind,
                        progress_record::Column::Status,
                        progress_record::Column::Progress,
                        progress_record::Column::Total,
                        progress_record::Column::Processed,
                        progress_record::Column::Failed,
                        progress_record::Column::Message,
                        progress_record::Column::Metadata,
                        progress_record::Column::Errors,
                        progress_record::Column::StartedAt,
                        progress_record::Column::EndedAt,
                        progress_record::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Option<Progress>> {
        let found = ProgressRecord::find_by_id(id).one(&self.conn).await?;
        Ok(found.map(to_domain))
    }

    async fn list_by_workspace(&self, workspace_id: &str, limit: u64) -> AppResult<Vec<Progress>> {
        let rows = ProgressRecord::find()
            .filter(progress_record::Column::WorkspaceId.eq(workspace_id))
            .order_by_desc(progress_record::Column::UpdatedAt)
            .limit(limit)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(to_domain).collect())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        ProgressRecord::delete_by_id(id).exec(&self.conn).await?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let outcome = ProgressRecord::delete_many()
            .filter(progress_record::Column::UpdatedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;

        Ok(outcome.rows_affected)
    }

    async fn stats(&self, workspace_id: &str) -> AppResult<ProgressStats> {
        let rows = ProgressRecord::find()
            .filter(progress_record::Column::WorkspaceId.eq(workspace_id))
            .all(&self.conn)
            .await?;

        let mut stats = ProgressStats::default();
        for row in rows {
            stats.total += 1;
            match ProgressStatus::from_str(&row.status).unwrap_or(ProgressStatus::Pending) {
                ProgressStatus::Pending => stats.pending += 1,
                ProgressStatus::Processing => stats.processing += 1,
                ProgressStatus::Completed => stats.completed += 1,
                ProgressStatus::Failed => stats.failed += 1,
                ProgressStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}
