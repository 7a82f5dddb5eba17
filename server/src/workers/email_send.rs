use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email_transport::{EmailTransport, OutgoingEmail};
use crate::error::{AppError, AppResult};
use crate::metrics::{domain, MetricsCollector};
use crate::model::send::{DeliveryStore, NewDelivery, NewSend, SendBatchResult, SendStore};
use crate::progress::{ProgressKind, ProgressPatch, ProgressStatus, ProgressTracker};
use crate::queue::{JobContext, JobError, JobHandler, JobOptions, NewJob, Queue};

use super::template;

pub const EMAIL_JOB_NAME: &str = "send-batch";
pub const BATCH_SIZE: usize = 100;
/// Inter-batch pacing: batch N is enqueued N seconds out.
const RATE_LIMIT_DELAY_MS: u64 = 1_000;
/// Pause between recipients inside a batch.
const INTRA_BATCH_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSendJobPayload {
    pub campaign_id: String,
    pub send_id: Uuid,
    pub batch_id: Uuid,
    pub batch_index: usize,
    pub total_batches: usize,
    pub recipients: Vec<Recipient>,
    pub template: EmailTemplate,
    pub sender: Sender,
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendStarted {
    pub send_id: Uuid,
    pub total_recipients: usize,
    pub total_batches: usize,
}

/// Enqueue-side of campaign fan-out. The send id is derived here, once,
/// and carried in every batch payload.
#[derive(Clone)]
pub struct SendService {
    queue: Queue,
    progress: ProgressTracker,
    sends: Arc<dyn SendStore>,
    metrics: MetricsCollector,
}

impl SendService {
    pub fn new(
        queue: Queue,
        progress: ProgressTracker,
        sends: Arc<dyn SendStore>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            queue,
            progress,
            sends,
            metrics,
        }
    }

    pub async fn start_send(
        &self,
        workspace_id: &str,
        campaign_id: &str,
        recipients: Vec<Recipient>,
        template: EmailTemplate,
        sender: Sender,
    ) -> AppResult<SendStarted> {
        if recipients.is_empty() {
            return Err(AppError::Validation("no recipients to send to".to_string()));
        }
        if !super::import::is_valid_email(&sender.email) {
            return Err(AppError::Validation(format!(
                "invalid sender address: {}",
                sender.email
            )));
        }

        let send_id = Uuid::new_v4();
        let total_recipients = recipients.len();
        let batches: Vec<Vec<Recipient>> = recipients
            .chunks(BATCH_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();

        self.sends
            .create(NewSend {
                id: send_id,
                campaign_id: campaign_id.to_string(),
                workspace_id: workspace_id.to_string(),
                total_recipients: total_recipients as i32,
                total_batches: total_batches as i32,
            })
            .await?;

        self.progress
            .create(
                &send_id.to_string(),
                ProgressKind::Email,
                workspace_id,
                total_recipients as u32,
                Some(serde_json::json!({
                    "campaign_id": campaign_id,
                    "total_batches": total_batches,
                })),
            )
            .await?;
        self.progress
            .update(
                &send_id.to_string(),
                ProgressPatch {
                    status: Some(ProgressStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;

        let jobs: Vec<NewJob> = batches
            .into_iter()
            .enumerate()
            .map(|(index, recipients)| {
                let payload = EmailSendJobPayload {
                    campaign_id: campaign_id.to_string(),
                    send_id,
                    batch_id: Uuid::new_v4(),
                    batch_index: index,
                    total_batches,
                    recipients,
                    template: template.clone(),
                    sender: sender.clone(),
                    workspace_id: workspace_id.to_string(),
                };
                NewJob {
                    name: EMAIL_JOB_NAME.to_string(),
                    payload: serde_json::to_value(&payload).expect("payload serializes"),
                    opts: JobOptions {
                        priority: -(index as i32),
                        delay: Duration::from_millis(index as u64 * RATE_LIMIT_DELAY_MS),
                        ..JobOptions::default()
                    },
                }
            })
            .collect();

        self.queue.add_bulk(jobs)?;
        self.metrics
            .record_campaign_event(domain::CAMPAIGN_SENT, workspace_id)
            .await;
        tracing::info!(
            "Send {} started for campaign {}: {} recipients in {} batches",
            send_id,
            campaign_id,
            total_recipients,
            total_batches
        );

        Ok(SendStarted {
            send_id,
            total_recipients,
            total_batches,
        })
    }

    /// Idempotent: cancelling twice reports the same outcome.
    pub async fn cancel(&self, workspace_id: &str, send_id: Uuid) -> AppResult<()> {
        let send = self
            .sends
            .get(send_id)
            .await?
            .filter(|send| send.workspace_id == workspace_id)
            .ok_or_else(|| AppError::NotFound(format!("send {send_id} not found")))?;

        if send.status == "cancelled" {
            return Ok(());
        }

        let removed = self.queue.remove_matching(|job| {
            serde_json::from_value::<EmailSendJobPayload>(job.payload.clone())
                .map(|payload| payload.send_id == send_id)
                .unwrap_or(false)
        });
        self.sends.set_status(send_id, "cancelled").await?;
        self.progress
            .update(
                &send_id.to_string(),
                ProgressPatch {
                    status: Some(ProgressStatus::Cancelled),
                    message: Some("send cancelled".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!("Send {} cancelled, {} jobs removed", send_id, removed);
        Ok(())
    }
}

/// Per-batch handler: personalize, hand to the transport, account per
/// recipient, pace between sends. Transport failures are recorded and the
/// batch continues.
pub struct EmailSendHandler {
    sends: Arc<dyn SendStore>,
    deliveries: Arc<dyn DeliveryStore>,
    progress: ProgressTracker,
    transport: Arc<dyn EmailTransport>,
    metrics: MetricsCollector,
    intra_batch_delay: Duration,
}

impl EmailSendHandler {
    pub fn new(
        sends: Arc<dyn SendStore>,
        deliveries: Arc<dyn DeliveryStore>,
        progress: ProgressTracker,
        transport: Arc<dyn EmailTransport>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            sends,
            deliveries,
            progress,
            transport,
            metrics,
            intra_batch_delay: Duration::from_millis(INTRA_BATCH_DELAY_MS),
        }
    }

    /// Override the per-recipient pacing, e.g. for a sandboxed transport.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        self.intra_batch_delay = delay;
        self
    }

    fn personalize(template: &EmailTemplate, recipient: &Recipient) -> (String, String, Option<String>) {
        let vars = template::recipient_vars(
            recipient.name.as_deref(),
            &recipient.email,
            recipient.metadata.as_ref(),
        );
        (
            template::substitute(&template.subject, &vars),
            template::substitute(&template.html, &vars),
            template
                .text
                .as_ref()
                .map(|text| template::substitute(text, &vars)),
        )
    }
}

#[async_trait::async_trait]
impl JobHandler for EmailSendHandler {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let payload: EmailSendJobPayload = ctx.parse_payload()?;
        let run_id = payload.send_id.to_string();

        match self.sends.get(payload.send_id).await {
            Ok(Some(send)) if send.status == "cancelled" => return Err(JobError::cancelled()),
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(JobError::permanent(format!(
                    "send {} does not exist",
                    payload.send_id
                )))
            }
            Err(e) => return Err(JobError::transient(e.to_string())),
        }

        let total = payload.recipients.len();
        let mut sent = 0i32;
        let mut failed = 0i32;
        let mut failures: Vec<String> = Vec::new();

        for (index, recipient) in payload.recipients.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(JobError::cancelled());
            }

            let (subject, html, text) = Self::personalize(&payload.template, recipient);
            let outgoing = OutgoingEmail {
                to_email: recipient.email.clone(),
                to_name: recipient.name.clone(),
                from_email: payload.sender.email.clone(),
                from_name: payload.sender.name.clone(),
                subject,
                html,
                text,
            };

            match self.transport.send(&outgoing).await {
                Ok(receipt) => {
                    sent += 1;
                    let delivery = NewDelivery {
                        send_id: payload.send_id,
                        workspace_id: payload.workspace_id.clone(),
                        recipient_email: recipient.email.clone(),
                        status: "sent".to_string(),
                        provider_id: Some(receipt.provider_id),
                        error: None,
                    };
                    if let Err(e) = self.deliveries.insert(delivery).await {
                        tracing::error!("Delivery row failed for {}: {}", recipient.email, e);
                    }
                    self.metrics
                        .record_email_event(domain::EMAIL_SENT, &payload.campaign_id)
                        .await;
                }
                Err(error) => {
                    failed += 1;
                    failures.push(format!("{}: {}", recipient.email, error.message));
                    let delivery = NewDelivery {
                        send_id: payload.send_id,
                        workspace_id: payload.workspace_id.clone(),
                        recipient_email: recipient.email.clone(),
                        status: "failed".to_string(),
                        provider_id: None,
                        error: Some(error.message.clone()),
                    };
                    if let Err(e) = self.deliveries.insert(delivery).await {
                        tracing::error!("Delivery row failed for {}: {}", recipient.email, e);
                    }
                    self.metrics
                        .record_email_event(domain::EMAIL_BOUNCED, &payload.campaign_id)
                        .await;
                }
            }

            let done = index + 1;
            ctx.report_progress(
                (done as f64 / total.max(1) as f64 * 100.0) as u8,
                &format!("batch {}/{}", payload.batch_index + 1, payload.total_batches),
                Some(serde_json::json!({
                    "sent": sent,
                    "failed": failed,
                    "total": total,
                })),
            );

            if done < total && !self.intra_batch_delay.is_zero() {
                tokio::time::sleep(self.intra_batch_delay).await;
            }
        }

        self.sends
            .upsert_batch(SendBatchResult {
                send_id: payload.send_id,
                batch_index: payload.batch_index as i32,
                sent,
                failed,
                failures: failures.clone(),
            })
            .await
            .map_err(|e| JobError::transient(format!("batch upsert failed: {e}")))?;

        let aggregate = self
            .sends
            .aggregate(payload.send_id)
            .await
            .map_err(|e| JobError::transient(format!("aggregate failed: {e}")))?;

        let finished = aggregate.completed_batches as usize >= payload.total_batches;
        if finished {
            self.sends
                .set_status(payload.send_id, "completed")
                .await
                .map_err(|e| JobError::transient(format!("status update failed: {e}")))?;
            self.metrics
                .record_campaign_event(domain::CAMPAIGN_COMPLETED, &payload.workspace_id)
                .await;
            tracing::info!(
                "Send {} completed: {} sent, {} failed",
                run_id,
                aggregate.sent,
                aggregate.failed
            );
        }

        let mut patch = ProgressPatch {
            processed: Some(aggregate.sent.max(0) as u32),
            failed: Some(aggregate.failed.max(0) as u32),
            message: Some(format!(
                "{}/{} batches complete",
                aggregate.completed_batches, payload.total_batches
            )),
            ..Default::default()
        };
        if !failures.is_empty() {
            patch.errors = Some(failures.clone());
        }
        if finished {
            patch.status = Some(ProgressStatus::Completed);
        }
        if let Err(e) = self.progress.update(&run_id, patch).await {
            tracing::error!("Progress update failed for send {}: {}", run_id, e);
        }

        Ok(serde_json::json!({
            "batch_index": payload.batch_index,
            "sent": sent,
            "failed": failed,
            "failures": failures,
        }))
    }
}
