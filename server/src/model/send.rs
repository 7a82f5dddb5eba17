use chrono::Utc;
use entity::{campaign_send, email_delivery, prelude::*, send_batch};
use sea_orm::sea_query::OnConflict;
use sea_orm::{entity::*, query::*, ActiveValue, DatabaseConnection, FromQueryResult};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewSend {
    pub id: Uuid,
    pub campaign_id: String,
    pub workspace_id: String,
    pub total_recipients: i32,
    pub total_batches: i32,
}

#[derive(Debug, Clone)]
pub struct SendBatchResult {
    pub send_id: Uuid,
    pub batch_index: i32,
    pub sent: i32,
    pub failed: i32,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendAggregate {
    pub completed_batches: i32,
    pub sent: i64,
    pub failed: i64,
}

#[async_trait::async_trait]
pub trait SendStore: Send + Sync {
    async fn create(&self, send: NewSend) -> AppResult<()>;
    async fn get(&self, send_id: Uuid) -> AppResult<Option<campaign_send::Model>>;
    async fn set_status(&self, send_id: Uuid, status: &str) -> AppResult<()>;
    async fn upsert_batch(&self, batch: SendBatchResult) -> AppResult<()>;
    async fn aggregate(&self, send_id: Uuid) -> AppResult<SendAggregate>;
}

/// Per-recipient accounting row.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub send_id: Uuid,
    pub workspace_id: String,
    pub recipient_email: String,
    pub status: String,
    pub provider_id: Option<String>,
    pub error: Option<String>,
}

#[async_trait::async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, delivery: NewDelivery) -> AppResult<()>;
    async fn list_for_send(&self, send_id: Uuid) -> AppResult<Vec<email_delivery::Model>>;
}

pub struct SendCtrl {
    pub conn: DatabaseConnection,
}

#[async_trait::async_trait]
impl SendStore for SendCtrl {
    async fn create(&self, send: NewSend) -> AppResult<()> {
        let now = Utc::now();
        CampaignSend::insert(campaign_send::ActiveModel {
            id: ActiveValue::Set(send.id),
            campaign_id: ActiveValue::Set(send.campaign_id),
            workspace_id: ActiveValue::Set(send.workspace_id),
            total_recipients: ActiveValue::Set(send.total_recipients),
            total_batches: ActiveValue::Set(send.total_batches),
            completed_batches: ActiveValue::Set(0),
            status: ActiveValue::Set("processing".to_string()),
            created_at: ActiveValue::Set(now.into()),
            updated_at: ActiveValue::Set(now.into()),
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn get(&self, send_id: Uuid) -> AppResult<Option<campaign_send::Model>> {
        Ok(CampaignSend::find_by_id(send_id).one(&self.conn).await?)
    }

    async fn set_status(&self, send_id: Uuid, status: &str) -> AppResult<()> {
        CampaignSend::update(campaign_send::ActiveModel {
            id: ActiveValue::Set(send_id),
            status: ActiveValue::Set(status.to_string()),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn upsert_batch(&self, batch: SendBatchResult) -> AppResult<()> {
        SendBatch::insert(send_batch::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            send_id: ActiveValue::Set(batch.send_id),
            batch_index: ActiveValue::Set(batch.batch_index),
            sent: ActiveValue::Set(batch.sent),
            failed: ActiveValue::Set(batch.failed),
            failures: ActiveValue::Set(serde_json::json!(batch.failures)),
            created_at: ActiveValue::Set(Utc::now().into()),
        })
        .on_conflict(
            OnConflict::columns([send_batch::Column::SendId, send_batch::Column::BatchIndex])
                .update_columns([
                    send_batch::Column::Sent,
                    send_batch::Column::Failed,
                    send_batch::Column::Failures,
                ])
                .to_owned(),
        )
        .exec(&self.conn)
        .await?;

        let aggregate = self.aggregate(batch.send_id).await?;
        CampaignSend::update(campaign_send::ActiveModel {
            id: ActiveValue::Set(batch.send_id),
            completed_batches: ActiveValue::Set(aggregate.completed_batches),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn aggregate(&self, send_id: Uuid) -> AppResult<SendAggregate> {
        #[derive(FromQueryResult)]
        struct Totals {
            batches: i64,
            sent: Option<i64>,
            failed: Option<i64>,
        }

        let totals = SendBatch::find()
            .filter(send_batch::Column::SendId.eq(send_id))
            .select_only()
            .column_as(send_batch::Column::Id.count(), "batches")
            .column_as(send_batch::Column::Sent.sum(), "sent")
            .column_as(send_batch::Column::Failed.sum(), "failed")
            .into_model::<Totals>()
            .one(&self.conn)
            .await?;

        Ok(totals
            .map(|t| SendAggregate {
                completed_batches: t.batches as i32,
                sent: t.sent.unwrap_or(0),
                failed: t.failed.unwrap_or(0),
            })
            .unwrap_or_default())
    }
}

pub struct DeliveryCtrl {
    pub conn: DatabaseConnection,
}

#[async_trait::async_trait]
impl DeliveryStore for DeliveryCtrl {
    async fn insert(&self, delivery: NewDelivery) -> AppResult<()> {
        EmailDelivery::insert(email_delivery::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            send_id: ActiveValue::Set(delivery.send_id),
            workspace_id: ActiveValue::Set(delivery.workspace_id),
            recipient_email: ActiveValue::Set(delivery.recipient_email),
            status: ActiveValue::Set(delivery.status),
            provider_id: ActiveValue::Set(delivery.provider_id),
            error: ActiveValue::Set(delivery.error),
            created_at: ActiveValue::Set(Utc::now().into()),
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn list_for_send(&self, send_id: Uuid) -> AppResult<Vec<email_delivery::Model>> {
        let rows = EmailDelivery::find()
            .filter(email_delivery::Column::SendId.eq(send_id))
            .order_by_asc(email_delivery::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(rows)
    }
}
