//! In-memory repository and transport fakes shared by the tests. They
//! honor the same contracts as the SeaORM-backed implementations so
//! worker and service flows can run end-to-end without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering::Relaxed};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use entity::{api_key, api_key_audit, contact_import, campaign_send, email_delivery, lead};

use crate::email_transport::{DeliveryReceipt, EmailTransport, OutgoingEmail, TransportError};
use crate::error::{AppError, AppResult};
use crate::model::api_key::{ApiKeyStore, ApiKeyUpdate, NewApiKey, NewAudit};
use crate::model::import::{ImportAggregate, ImportBatchResult, ImportStore, NewImport};
use crate::model::lead::{LeadPatch, LeadStore, NewLead};
use crate::model::progress_record::ProgressStore;
use crate::model::send::{
    DeliveryStore, NewDelivery, NewSend, SendAggregate, SendBatchResult, SendStore,
};
use crate::progress::{Progress, ProgressStats, ProgressStatus};

#[derive(Default)]
pub struct InMemoryLeadStore {
    pub leads: Mutex<Vec<lead::Model>>,
}

#[async_trait::async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn find_by_email(
        &self,
        workspace_id: &str,
        email: &str,
    ) -> AppResult<Option<lead::Model>> {
        Ok(self
            .leads
            .lock()
            .unwrap()
            .iter()
            .find(|lead| lead.workspace_id == workspace_id && lead.email == email)
            .cloned())
    }

    async fn insert(&self, new_lead: NewLead) -> AppResult<lead::Model> {
        let now = Utc::now();
        let model = lead::Model {
            id: Uuid::new_v4(),
            workspace_id: new_lead.workspace_id,
            email: new_lead.email,
            name: new_lead.name,
            phone: new_lead.phone,
            tags: serde_json::json!(new_lead.tags),
            metadata: new_lead.metadata,
            source: new_lead.source,
            status: new_lead.status,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.leads.lock().unwrap().push(model.clone());
        Ok(model)
    }

    async fn update_fields(&self, id: Uuid, patch: LeadPatch) -> AppResult<()> {
        let mut leads = self.leads.lock().unwrap();
        let lead = leads
            .iter_mut()
            .find(|lead| lead.id == id)
            .ok_or_else(|| AppError::NotFound(format!("lead {id} not found")))?;
        if let Some(name) = patch.name {
            lead.name = Some(name);
        }
        if let Some(phone) = patch.phone {
            lead.phone = Some(phone);
        }
        if let Some(tags) = patch.tags {
            lead.tags = serde_json::json!(tags);
        }
        if let Some(metadata) = patch.metadata {
            lead.metadata = metadata;
        }
        lead.updated_at = Utc::now().into();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryImportStore {
    pub imports: Mutex<HashMap<Uuid, contact_import::Model>>,
    pub batches: Mutex<HashMap<(Uuid, i32), ImportBatchResult>>,
}

#[async_trait::async_trait]
impl ImportStore for InMemoryImportStore {
    async fn create(&self, import: NewImport) -> AppResult<()> {
        let now = Utc::now();
        self.imports.lock().unwrap().insert(
            import.id,
            contact_import::Model {
                id: import.id,
                workspace_id: import.workspace_id,
                total_records: import.total_records,
                total_batches: import.total_batches,
                completed_batches: 0,
                status: "processing".to_string(),
                created_at: now.into(),
                updated_at: now.into(),
            },
        );
        Ok(())
    }

    async fn get(&self, import_id: Uuid) -> AppResult<Option<contact_import::Model>> {
        Ok(self.imports.lock().unwrap().get(&import_id).cloned())
    }

    async fn set_status(&self, import_id: Uuid, status: &str) -> AppResult<()> {
        let mut imports = self.imports.lock().unwrap();
        let import = imports
            .get_mut(&import_id)
            .ok_or_else(|| AppError::NotFound(format!("import {import_id} not found")))?;
        import.status = status.to_string();
        import.updated_at = Utc::now().into();
        Ok(())
    }

    async fn upsert_batch(&self, batch: ImportBatchResult) -> AppResult<()> {
        self.batches
            .lock()
            .unwrap()
            .insert((batch.import_id, batch.batch_index), batch.clone());
        let aggregate = self.aggregate(batch.import_id).await?;
        if let Some(import) = self.imports.lock().unwrap().get_mut(&batch.import_id) {
            import.completed_batches = aggregate.completed_batches;
        }
        Ok(())
    }

    async fn aggregate(&self, import_id: Uuid) -> AppResult<ImportAggregate> {
        let batches = self.batches.lock().unwrap();
        let mut aggregate = ImportAggregate::default();
        for batch in batches.values().filter(|b| b.import_id == import_id) {
            aggregate.completed_batches += 1;
            aggregate.processed += i64::from(batch.processed);
            aggregate.failed += i64::from(batch.failed);
        }
        Ok(aggregate)
    }
}

#[derive(Default)]
pub struct InMemorySendStore {
    pub sends: Mutex<HashMap<Uuid, campaign_send::Model>>,
    pub batches: Mutex<HashMap<(Uuid, i32), SendBatchResult>>,
}

#[async_trait::async_trait]
impl SendStore for InMemorySendStore {
    async fn create(&self, send: NewSend) -> AppResult<()> {
        let now = Utc::now();
        self.sends.lock().unwrap().insert(
            send.id,
            campaign_send::Model {
                id: send.id,
                campaign_id: send.campaign_id,
                workspace_id: send.workspace_id,
                total_recipients: send.total_recipients,
                total_batches: send.total_batches,
                completed_batches: 0,
                status: "processing".to_string(),
                created_at: now.into(),
                updated_at: now.into(),
            },
        );
        Ok(())
    }

    async fn get(&self, send_id: Uuid) -> AppResult<Option<campaign_send::Model>> {
        Ok(self.sends.lock().unwrap().get(&send_id).cloned())
    }

    async fn set_status(&self, send_id: Uuid, status: &str) -> AppResult<()> {
        let mut sends = self.sends.lock().unwrap();
        let send = sends
            .get_mut(&send_id)
            .ok_or_else(|| AppError::NotFound(format!("send {send_id} not found")))?;
        send.status = status.to_string();
        send.updated_at = Utc::now().into();
        Ok(())
    }

    async fn upsert_batch(&self, batch: SendBatchResult) -> AppResult<()> {
        self.batches
            .lock()
            .unwrap()
            .insert((batch.send_id, batch.batch_index), batch.clone());
        let aggregate = self.aggregate(batch.send_id).await?;
        if let Some(send) = self.sends.lock().unwrap().get_mut(&batch.send_id) {
            send.completed_batches = aggregate.completed_batches;
        }
        Ok(())
    }

    async fn aggregate(&self, send_id: Uuid) -> AppResult<SendAggregate> {
        let batches = self.batches.lock().unwrap();
        let mut aggregate = SendAggregate::default();
        for batch in batches.values().filter(|b| b.send_id == send_id) {
            aggregate.completed_batches += 1;
            aggregate.sent += i64::from(batch.sent);
            aggregate.failed += i64::from(batch.failed);
        }
        Ok(aggregate)
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryStore {
    pub rows: Mutex<Vec<email_delivery::Model>>,
}

#[async_trait::async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert(&self, delivery: NewDelivery) -> AppResult<()> {
        self.rows.lock().unwrap().push(email_delivery::Model {
            id: Uuid::new_v4(),
            send_id: delivery.send_id,
            workspace_id: delivery.workspace_id,
            recipient_email: delivery.recipient_email,
            status: delivery.status,
            provider_id: delivery.provider_id,
            error: delivery.error,
            created_at: Utc::now().into(),
        });
        Ok(())
    }

    async fn list_for_send(&self, send_id: Uuid) -> AppResult<Vec<email_delivery::Model>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.send_id == send_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    pub records: Mutex<HashMap<String, Progress>>,
}

#[async_trait::async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn upsert(&self, record: &Progress) -> AppResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Option<Progress>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: &str, limit: u64) -> AppResult<Vec<Progress>> {
        let mut records: Vec<Progress> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.workspace_id == workspace_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, record| record.updated_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn stats(&self, workspace_id: &str) -> AppResult<ProgressStats> {
        let records = self.records.lock().unwrap();
        let mut stats = ProgressStats::default();
        for record in records
            .values()
            .filter(|record| record.workspace_id == workspace_id)
        {
            stats.total += 1;
            match record.status {
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

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    pub keys: Mutex<HashMap<Uuid, api_key::Model>>,
    pub audit_rows: Mutex<Vec<api_key_audit::Model>>,
    audit_seq: AtomicI64,
}

impl InMemoryApiKeyStore {
    pub fn audit_actions(&self, api_key_id: Uuid) -> Vec<String> {
        self.audit_rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.api_key_id == api_key_id)
            .map(|row| row.action.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn insert(&self, key: NewApiKey) -> AppResult<()> {
        self.keys.lock().unwrap().insert(
            key.id,
            api_key::Model {
                id: key.id,
                workspace_id: key.workspace_id,
                name: key.name,
                key_hash: key.key_hash,
                permissions: serde_json::json!(key.permissions),
                status: "active".to_string(),
                expires_at: key.expires_at.into(),
                auto_renew: key.auto_renew,
                renewal_period_days: key.renewal_period_days,
                revoked_at: None,
                revoked_by: None,
                revoked_reason: None,
                last_used_at: None,
                created_at: Utc::now().into(),
            },
        );
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<api_key::Model>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .values()
            .find(|key| key.key_hash == key_hash)
            .cloned())
    }

    async fn find(&self, id: Uuid, workspace_id: &str) -> AppResult<Option<api_key::Model>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(&id)
            .filter(|key| key.workspace_id == workspace_id)
            .cloned())
    }

    async fn list(
        &self,
        workspace_id: &str,
        include_revoked: bool,
    ) -> AppResult<Vec<api_key::Model>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .values()
            .filter(|key| key.workspace_id == workspace_id)
            .filter(|key| include_revoked || key.status != "revoked")
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, update: ApiKeyUpdate) -> AppResult<()> {
        let mut keys = self.keys.lock().unwrap();
        let key = keys
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("api key {id} not found")))?;
        if let Some(status) = update.status {
            key.status = status;
        }
        if let Some(expires_at) = update.expires_at {
            key.expires_at = expires_at.into();
        }
        if let Some(last_used_at) = update.last_used_at {
            key.last_used_at = Some(last_used_at.into());
        }
        if let Some(auto_renew) = update.auto_renew {
            key.auto_renew = auto_renew;
        }
        if let Some(days) = update.renewal_period_days {
            key.renewal_period_days = days;
        }
        if let Some(name) = update.name {
            key.name = name;
        }
        if let Some(permissions) = update.permissions {
            key.permissions = serde_json::json!(permissions);
        }
        if let Some(revoked_at) = update.revoked_at {
            key.revoked_at = Some(revoked_at.into());
        }
        if let Some(revoked_by) = update.revoked_by {
            key.revoked_by = Some(revoked_by);
        }
        if let Some(revoked_reason) = update.revoked_reason {
            key.revoked_reason = Some(revoked_reason);
        }
        Ok(())
    }

    async fn expiring_within(
        &self,
        workspace_id: Option<&str>,
        within_days: i64,
        only_auto_renew: bool,
    ) -> AppResult<Vec<api_key::Model>> {
        let horizon = Utc::now() + ChronoDuration::days(within_days);
        Ok(self
            .keys
            .lock()
            .unwrap()
            .values()
            .filter(|key| key.status == "active")
            .filter(|key| {
                let expires_at: DateTime<Utc> = key.expires_at.into();
                expires_at <= horizon
            })
            .filter(|key| workspace_id.map_or(true, |ws| key.workspace_id == ws))
            .filter(|key| !only_auto_renew || key.auto_renew)
            .cloned()
            .collect())
    }

    async fn insert_audit(&self, audit: NewAudit) -> AppResult<()> {
        let id = self.audit_seq.fetch_add(1, Relaxed) + 1;
        self.audit_rows.lock().unwrap().push(api_key_audit::Model {
            id,
            api_key_id: audit.api_key_id,
            action: audit.action,
            user_id: audit.user_id,
            ip_address: audit.ip_address,
            user_agent: audit.user_agent,
            metadata: audit.metadata,
            created_at: Utc::now().into(),
        });
        Ok(())
    }

    async fn audits(&self, api_key_id: Uuid, limit: u64) -> AppResult<Vec<api_key_audit::Model>> {
        let mut rows: Vec<api_key_audit::Model> = self
            .audit_rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.api_key_id == api_key_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

/// Transport double: records every send; addresses on the failure list
/// are rejected with the configured retry class.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<OutgoingEmail>>,
    pub fail_addresses: Mutex<HashSet<String>>,
    pub fail_retryable: Mutex<bool>,
}

impl MockTransport {
    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            fail_addresses: Mutex::new(addresses.iter().map(|a| a.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|email| email.to_email.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl EmailTransport for MockTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError> {
        if self.fail_addresses.lock().unwrap().contains(&email.to_email) {
            return Err(TransportError {
                message: format!("mailbox unavailable for {}", email.to_email),
                retryable: *self.fail_retryable.lock().unwrap(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(DeliveryReceipt {
            provider_id: format!("mock-{}", self.sent.lock().unwrap().len()),
        })
    }
}
