use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::model::api_key::ApiKeyUpdate;
use crate::shared_store::SharedStore;

use super::service::{ApiKeyService, EXPIRING_SOON_DAYS};

/// Notifications ride the pub/sub channel; HTTP/UI layers subscribe.
pub const NOTIFY_CHANNEL: &str = "notifications:api_keys";
const DEDUP_TTL_SECS: u64 = 24 * 3_600;

#[derive(Debug, Serialize)]
struct KeyNotification<'a> {
    kind: &'a str,
    key_id: Uuid,
    workspace_id: &'a str,
    name: &'a str,
    expires_at: DateTime<Utc>,
}

/// Scheduler task for the key lifecycle: auto-renew, expiring-soon
/// notices, expiry sweep. Notifications deduplicate over 24h via a
/// shared-store guard key.
#[derive(Clone)]
pub struct ApiKeyMaintenance {
    service: ApiKeyService,
    store: SharedStore,
}

impl ApiKeyMaintenance {
    pub fn new(service: ApiKeyService, store: SharedStore) -> Self {
        Self { service, store }
    }

    pub async fn run(&self) -> AppResult<()> {
        self.auto_renew().await?;
        self.notify_expiring().await?;
        self.sweep_expired().await?;
        Ok(())
    }

    async fn auto_renew(&self) -> AppResult<()> {
        let renewable = self
            .service
            .repo()
            .expiring_within(None, EXPIRING_SOON_DAYS, true)
            .await?;

        for key in renewable {
            match self
                .service
                .renew(key.id, &key.workspace_id, None, None)
                .await
            {
                Ok(new_expiry) => {
                    tracing::info!("Auto-renewed key {} until {}", key.id, new_expiry);
                    self.notify("renewed", &key.workspace_id, key.id, &key.name, new_expiry)
                        .await;
                }
                Err(e) => tracing::error!("Auto-renew failed for key {}: {}", key.id, e),
            }
        }
        Ok(())
    }

    async fn notify_expiring(&self) -> AppResult<()> {
        let expiring = self
            .service
            .repo()
            .expiring_within(None, EXPIRING_SOON_DAYS, false)
            .await?;

        for key in expiring {
            // auto-renew keys were just pushed out; skip the ones that no
            // longer expire soon is handled by the dedup guard either way
            if key.auto_renew {
                continue;
            }
            self.notify(
                "expiring_soon",
                &key.workspace_id,
                key.id,
                &key.name,
                key.expires_at.into(),
            )
            .await;
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> AppResult<()> {
        let candidates = self.service.repo().expiring_within(None, 0, false).await?;
        let now = Utc::now();

        for key in candidates {
            let expires_at: DateTime<Utc> = key.expires_at.into();
            if expires_at > now {
                continue;
            }
            self.service
                .repo()
                .update(
                    key.id,
                    ApiKeyUpdate {
                        status: Some("expired".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!("Key {} expired at {}", key.id, expires_at);
            self.notify("expired", &key.workspace_id, key.id, &key.name, expires_at)
                .await;
        }
        Ok(())
    }

    async fn notify(
        &self,
        kind: &str,
        workspace_id: &str,
        key_id: Uuid,
        name: &str,
        expires_at: DateTime<Utc>,
    ) {
        let guard_key = format!("notify:api_key:{key_id}:{kind}");
        if self.store.get(&guard_key).await.is_some() {
            return;
        }
        self.store.setex(&guard_key, "1", DEDUP_TTL_SECS).await;

        let notification = KeyNotification {
            kind,
            key_id,
            workspace_id,
            name,
            expires_at,
        };
        if let Ok(payload) = serde_json::to_string(&notification) {
            self.store.publish(NOTIFY_CHANNEL, &payload).await;
        }
        tracing::info!("Key notification {} for {} ({})", kind, key_id, workspace_id);
    }
}
