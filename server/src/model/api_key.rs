use chrono::{DateTime, Duration as ChronoDuration, Utc};
use entity::{api_key, api_key_audit, prelude::*};
use sea_orm::{entity::*, query::*, ActiveValue, DatabaseConnection};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub renewal_period_days: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdate {
    pub status: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub auto_renew: Option<bool>,
    pub renewal_period_days: Option<i32>,
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revoked_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAudit {
    pub api_key_id: Uuid,
    pub action: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

#[async_trait::async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert(&self, key: NewApiKey) -> AppResult<()>;
    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<api_key::Model>>;
    async fn find(&self, id: Uuid, workspace_id: &str) -> AppResult<Option<api_key::Model>>;
    async fn list(
        &self,
        workspace_id: &str,
        include_revoked: bool,
    ) -> AppResult<Vec<api_key::Model>>;
    async fn update(&self, id: Uuid, update: ApiKeyUpdate) -> AppResult<()>;
    /// Active keys whose expiry falls inside the window.
    async fn expiring_within(
        &self,
        workspace_id: Option<&str>,
        within_days: i64,
        only_auto_renew: bool,
    ) -> AppResult<Vec<api_key::Model>>;
    async fn insert_audit(&self, audit: NewAudit) -> AppResult<()>;
    async fn audits(&self, api_key_id: Uuid, limit: u64) -> AppResult<Vec<api_key_audit::Model>>;
}

pub struct ApiKeyCtrl {
    pub conn: DatabaseConnection,
}

#[async_trait::async_trait]
impl ApiKeyStore for ApiKeyCtrl {
    async fn insert(&self, key: NewApiKey) -> AppResult<()> {
        ApiKey::insert(api_key::ActiveModel {
            id: ActiveValue::Set(key.id),
            workspace_id: ActiveValue::Set(key.workspace_id),
            name: ActiveValue::Set(key.name),
            key_hash: ActiveValue::Set(key.key_hash),
            permissions: ActiveValue::Set(serde_json::json!(key.permissions)),
            status: ActiveValue::Set("active".to_string()),
            expires_at: ActiveValue::Set(key.expires_at.into()),
            auto_renew: ActiveValue::Set(key.auto_renew),
            renewal_period_days: ActiveValue::Set(key.renewal_period_days),
            revoked_at: ActiveValue::Set(None),
            revoked_by: ActiveValue::Set(None),
            revoked_reason: ActiveValue::Set(None),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(Utc::now().into()),
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<api_key::Model>> {
        let found = ApiKey::find()
            .filter(api_key::Column::KeyHash.eq(key_hash))
            .one(&self.conn)
            .await?;

        Ok(found)
    }

    async fn find(&self, id: Uuid, workspace_id: &str) -> AppResult<Option<api_key::Model>> {
        let found = ApiKey::find_by_id(id)
            .filter(api_key::Column::WorkspaceId.eq(workspace_id))
            .one(&self.conn)
            .await?;

        Ok(found)
    }

    async fn list(
        &self,
        workspace_id: &str,
        include_revoked: bool,
    ) -> AppResult<Vec<api_key::Model>> {
        let mut query = ApiKey::find().filter(api_key::Column::WorkspaceId.eq(workspace_id));
        if !include_revoked {
            query = query.filter(api_key::Column::Status.ne("revoked"));
        }
        let keys = query
            .order_by_desc(api_key::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(keys)
    }

    async fn update(&self, id: Uuid, update: ApiKeyUpdate) -> AppResult<()> {
        let mut model = api_key::ActiveModel {
            id: ActiveValue::Set(id),
            ..Default::default()
        };
        if let Some(status) = update.status {
            model.status = ActiveValue::Set(status);
        }
        if let Some(expires_at) = update.expires_at {
            model.expires_at = ActiveValue::Set(expires_at.into());
        }
        if let Some(last_used_at) = update.last_used_at {
            model.last_used_at = ActiveValue::Set(Some(last_used_at.into()));
        }
        if let Some(auto_renew) = update.auto_renew {
            model.auto_renew = ActiveValue::Set(auto_renew);
        }
        if let Some(days) = update.renewal_period_days {
            model.renewal_period_days = ActiveValue::Set(days);
        }
        if let Some(name) = update.name {
            model.name = ActiveValue::Set(name);
        }
        if let Some(permissions) = update.permissions {
            model.permissions = ActiveValue::Set(serde_json::json!(permissions));
        }
        if let Some(revoked_at) = update.revoked_at {
            model.revoked_at = ActiveValue::Set(Some(revoked_at.into()));
        }
        if let Some(revoked_by) = update.revoked_by {
            model.revoked_by = ActiveValue::Set(Some(revoked_by));
        }
        if let Some(revoked_reason) = update.revoked_reason {
            model.revoked_reason = ActiveValue::Set(Some(revoked_reason));
        }

        ApiKey::update(model).exec(&self.conn).await?;
        Ok(())
    }

    async fn expiring_within(
        &self,
        workspace_id: Option<&str>,
        within_days: i64,
        only_auto_renew: bool,
    ) -> AppResult<Vec<api_key::Model>> {
        let horizon = Utc::now() + ChronoDuration::days(within_days);
        let mut query = ApiKey::find()
            .filter(api_key::Column::Status.eq("active"))
            .filter(api_key::Column::ExpiresAt.lte(horizon));
        if let Some(workspace_id) = workspace_id {
            query = query.filter(api_key::Column::WorkspaceId.eq(workspace_id));
        }
        if only_auto_renew {
            query = query.filter(api_key::Column::AutoRenew.eq(true));
        }
        let keys = query
            .order_by_asc(api_key::Column::ExpiresAt)
            .all(&self.conn)
            .await?;

        Ok(keys)
    }

    async fn insert_audit(&self, audit: NewAudit) -> AppResult<()> {
        ApiKeyAudit::insert(api_key_audit::ActiveModel {
            id: ActiveValue::NotSet,
            api_key_id: ActiveValue::Set(audit.api_key_id),
            action: ActiveValue::Set(audit.action),
            user_id: ActiveValue::Set(audit.user_id),
            ip_address: ActiveValue::Set(audit.ip_address),
            user_agent: ActiveValue::Set(audit.user_agent),
            metadata: ActiveValue::Set(audit.metadata),
            created_at: ActiveValue::Set(Utc::now().into()),
        })
        .exec(&self.conn)
        .await?;

        Ok(())
    }

    async fn audits(&self, api_key_id: Uuid, limit: u64) -> AppResult<Vec<api_key_audit::Model>> {
        let rows = ApiKeyAudit::find()
            .filter(api_key_audit::Column::ApiKeyId.eq(api_key_id))
            .order_by_desc(api_key_audit::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await?;

        Ok(rows)
    }
}
