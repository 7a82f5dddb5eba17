use chrono::Utc;
use entity::{lead, prelude::*};
use sea_orm::{entity::*, query::*, ActiveValue, DatabaseConnection};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewLead {
    pub workspace_id: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub source: String,
    pub status: String,
}

/// Mutable fields refreshed when an import hits an existing contact.
#[derive(Debug, Clone, Default)]
pub struct LeadPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_email(
        &self,
        workspace_id: &str,
        email: &str,
    ) -> AppResult<Option<lead::Model>>;
    async fn insert(&self, new_lead: NewLead) -> AppResult<lead::Model>;
    async fn update_fields(&self, id: Uuid, patch: LeadPatch) -> AppResult<()>;
}

pub struct LeadCtrl {
    pub conn: DatabaseConnection,
}

#[async_trait::async_trait]
impl LeadStore for LeadCtrl {
    async fn find_by_email(
        &self,
        workspace_id: &str,
        email: &str,
    ) -> AppResult<Option<lead::Model>> {
        let found = Lead::find()
            .filter(lead::Column::WorkspaceId.eq(workspace_id))
            .filter(lead::Column::Email.eq(email))
            .one(&self.conn)
            .await?;

        Ok(found)
    }

    async fn insert(&self, new_lead: NewLead) -> AppResult<lead::Model> {
        let now = Utc::now();
        let model = lead::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            workspace_id: ActiveValue::Set(new_lead.workspace_id),
            email: ActiveValue::Set(new_lead.email),
            name: ActiveValue::Set(new_lead.name),
            phone: ActiveValue::Set(new_lead.phone),
            tags: ActiveValue::Set(serde_json::json!(new_lead.tags)),
            metadata: ActiveValue::Set(new_lead.metadata),
            source: ActiveValue::Set(new_lead.source),
            status: ActiveValue::Set(new_lead.status),
            created_at: ActiveValue::Set(now.into()),
            updated_at: ActiveValue::Set(now.into()),
        }
        .insert(&self.conn)
        .await?;

        Ok(model)
    }

    async fn update_fields(&self, id: Uuid, patch: LeadPatch) -> AppResult<()> {
        let mut model = lead::ActiveModel {
            id: ActiveValue::Set(id),
            updated_at: ActiveValue::Set(Utc::now().into()),
            ..Default::default()
        };
        if let Some(name) = patch.name {
            model.name = ActiveValue::Set(Some(name));
        }
        if let Some(phone) = patch.phone {
            model.phone = ActiveValue::Set(Some(phone));
        }
        if let Some(tags) = patch.tags {
            model.tags = ActiveValue::Set(serde_json::json!(tags));
        }
        if let Some(metadata) = patch.metadata {
            model.metadata = ActiveValue::Set(metadata);
        }
        Lead::update(model).exec(&self.conn).await?;

        Ok(())
    }
}
