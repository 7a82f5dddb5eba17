use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use entity::{api_key, api_key_audit};

use crate::error::{AppError, AppResult};
use crate::model::api_key::{ApiKeyStore, ApiKeyUpdate, NewApiKey, NewAudit};

pub const KEY_PREFIX: &str = "es_live_";
const KEY_RANDOM_BYTES: usize = 24;
const DEFAULT_EXPIRATION_DAYS: i64 = 90;
pub const EXPIRING_SOON_DAYS: i64 = 7;

lazy_static! {
    static ref KEY_RE: Regex =
        Regex::new(r"^es_live_[a-f0-9]{48}$").expect("api key regex is valid");
}

/// SHA-256 hex digest; the only form of a key that is ever persisted.
pub fn hash_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub id: Uuid,
    /// Returned exactly once, at creation. No read path can produce it
    /// again.
    pub plaintext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatedKey {
    pub id: Uuid,
    pub workspace_id: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct KeySettings {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub auto_renew: Option<bool>,
    pub renewal_period_days: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiKeyStats {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
    pub revoked: u64,
    pub expiring_soon: u64,
}

#[derive(Clone)]
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyStore>,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeyStore>) -> Self {
        Self { repo }
    }

    pub(crate) fn repo(&self) -> &Arc<dyn ApiKeyStore> {
        &self.repo
    }

    fn generate_plaintext() -> String {
        let mut bytes = [0u8; KEY_RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{KEY_PREFIX}{}", hex::encode(bytes))
    }

    fn permissions_of(model: &api_key::Model) -> Vec<String> {
        serde_json::from_value(model.permissions.clone()).unwrap_or_default()
    }

    pub async fn create(
        &self,
        workspace_id: &str,
        name: &str,
        permissions: Vec<String>,
        expiration_days: Option<i64>,
        auto_renew: bool,
    ) -> AppResult<CreatedKey> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("key name is required".to_string()));
        }
        let expiration_days = expiration_days.unwrap_or(DEFAULT_EXPIRATION_DAYS);

        let plaintext = Self::generate_plaintext();
        let id = Uuid::new_v4();
        self.repo
            .insert(NewApiKey {
                id,
                workspace_id: workspace_id.to_string(),
                name: name.to_string(),
                key_hash: hash_key(&plaintext),
                permissions: permissions.clone(),
                expires_at: Utc::now() + ChronoDuration::days(expiration_days),
                auto_renew,
                renewal_period_days: DEFAULT_EXPIRATION_DAYS as i32,
            })
            .await?;

        self.audit(
            id,
            "created",
            None,
            None,
            serde_json::json!({
                "name": name,
                "permissions": permissions,
                "expiration_days": expiration_days,
                "auto_renew": auto_renew,
            }),
        )
        .await;

        Ok(CreatedKey { id, plaintext })
    }

    /// `None` means the key is unusable: malformed, unknown, revoked or
    /// expired. Observing an expired key flips it to `expired` exactly
    /// once, with one audit row.
    pub async fn validate(
        &self,
        plaintext: &str,
        request: Option<RequestContext>,
    ) -> AppResult<Option<ValidatedKey>> {
        if !KEY_RE.is_match(plaintext) {
            return Ok(None);
        }

        let Some(model) = self.repo.find_by_hash(&hash_key(plaintext)).await? else {
            return Ok(None);
        };

        if model.status != "active" {
            return Ok(None);
        }

        let expires_at: DateTime<Utc> = model.expires_at.into();
        if expires_at <= Utc::now() {
            self.repo
                .update(
                    model.id,
                    ApiKeyUpdate {
                        status: Some("expired".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            self.audit(
                model.id,
                "expired",
                None,
                None,
                serde_json::json!({ "expired_at": expires_at.to_rfc3339() }),
            )
            .await;
            return Ok(None);
        }

        let request = request.unwrap_or_default();
        self.repo
            .update(
                model.id,
                ApiKeyUpdate {
                    last_used_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.audit(
            model.id,
            "used",
            None,
            request.ip_address.clone(),
            serde_json::json!({ "user_agent": request.user_agent }),
        )
        .await;

        Ok(Some(ValidatedKey {
            id: model.id,
            workspace_id: model.workspace_id.clone(),
            permissions: Self::permissions_of(&model),
        }))
    }

    pub async fn revoke(
        &self,
        id: Uuid,
        workspace_id: &str,
        user_id: Option<&str>,
        reason: Option<&str>,
    ) -> AppResult<()> {
        let model = self.owned(id, workspace_id).await?;
        if model.status == "revoked" {
            return Ok(());
        }

        self.repo
            .update(
                id,
                ApiKeyUpdate {
                    status: Some("revoked".to_string()),
                    revoked_at: Some(Utc::now()),
                    revoked_by: user_id.map(str::to_string),
                    revoked_reason: reason.map(str::to_string),
                    ..Default::default()
                },
            )
            .await?;
        self.audit(
            id,
            "revoked",
            user_id,
            None,
            serde_json::json!({ "reason": reason }),
        )
        .await;
        Ok(())
    }

    /// Push the expiry out from now (or from the current expiry, whichever
    /// is later) and reactivate an expired key.
    pub async fn renew(
        &self,
        id: Uuid,
        workspace_id: &str,
        user_id: Option<&str>,
        extension_days: Option<i64>,
    ) -> AppResult<DateTime<Utc>> {
        let model = self.owned(id, workspace_id).await?;
        if model.status == "revoked" {
            return Err(AppError::Validation(
                "revoked keys cannot be renewed".to_string(),
            ));
        }

        let days = extension_days.unwrap_or(i64::from(model.renewal_period_days));
        let current: DateTime<Utc> = model.expires_at.into();
        let base = current.max(Utc::now());
        let new_expiry = base + ChronoDuration::days(days);

        self.repo
            .update(
                id,
                ApiKeyUpdate {
                    status: Some("active".to_string()),
                    expires_at: Some(new_expiry),
                    ..Default::default()
                },
            )
            .await?;
        self.audit(
            id,
            "renewed",
            user_id,
            None,
            serde_json::json!({
                "extension_days": days,
                "new_expiry": new_expiry.to_rfc3339(),
            }),
        )
        .await;
        Ok(new_expiry)
    }

    pub async fn update_settings(
        &self,
        id: Uuid,
        workspace_id: &str,
        settings: KeySettings,
    ) -> AppResult<()> {
        self.owned(id, workspace_id).await?;
        self.repo
            .update(
                id,
                ApiKeyUpdate {
                    name: settings.name.clone(),
                    permissions: settings.permissions.clone(),
                    auto_renew: settings.auto_renew,
                    renewal_period_days: settings.renewal_period_days,
                    ..Default::default()
                },
            )
            .await?;
        self.audit(
            id,
            "settings_updated",
            None,
            None,
            serde_json::json!({
                "name": settings.name,
                "auto_renew": settings.auto_renew,
                "renewal_period_days": settings.renewal_period_days,
            }),
        )
        .await;
        Ok(())
    }

    pub async fn list(
        &self,
        workspace_id: &str,
        include_revoked: bool,
    ) -> AppResult<Vec<api_key::Model>> {
        self.repo.list(workspace_id, include_revoked).await
    }

    pub async fn stats(&self, workspace_id: &str) -> AppResult<ApiKeyStats> {
        let keys = self.repo.list(workspace_id, true).await?;
        let soon = Utc::now() + ChronoDuration::days(EXPIRING_SOON_DAYS);

        let mut stats = ApiKeyStats::default();
        for key in keys {
            stats.total += 1;
            match key.status.as_str() {
                "active" => {
                    stats.active += 1;
                    let expires_at: DateTime<Utc> = key.expires_at.into();
                    if expires_at <= soon {
                        stats.expiring_soon += 1;
                    }
                }
                "expired" => stats.expired += 1,
                "revoked" => stats.revoked += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub async fn expiring(
        &self,
        workspace_id: &str,
        days_before: Option<i64>,
    ) -> AppResult<Vec<api_key::Model>> {
        self.repo
            .expiring_within(
                Some(workspace_id),
                days_before.unwrap_or(EXPIRING_SOON_DAYS),
                false,
            )
            .await
    }

    pub async fn audit_logs(
        &self,
        id: Uuid,
        workspace_id: &str,
        limit: Option<u64>,
    ) -> AppResult<Vec<api_key_audit::Model>> {
        self.owned(id, workspace_id).await?;
        self.repo.audits(id, limit.unwrap_or(50)).await
    }

    async fn owned(&self, id: Uuid, workspace_id: &str) -> AppResult<api_key::Model> {
        self.repo
            .find(id, workspace_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("api key {id} not found")))
    }

    /// Append-only audit row; never carries plaintext key material.
    async fn audit(
        &self,
        api_key_id: Uuid,
        action: &str,
        user_id: Option<&str>,
        ip_address: Option<String>,
        metadata: serde_json::Value,
    ) {
        let outcome = self
            .repo
            .insert_audit(NewAudit {
                api_key_id,
                action: action.to_string(),
                user_id: user_id.map(str::to_string),
                ip_address,
                user_agent: None,
                metadata,
            })
            .await;
        if let Err(e) = outcome {
            tracing::error!("Audit write failed for key {} ({}): {}", api_key_id, action, e);
        }
    }
}
