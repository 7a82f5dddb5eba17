use std::sync::Arc;

use chrono::{DateTime, Utc};
use minijinja::render;
use serde::Serialize;

use crate::email_transport::{EmailTransport, OutgoingEmail};
use crate::HttpClient;

use super::manager::AlertIncident;
use super::rules::{AlertChannel, AlertRule, ChannelKind};

const ALERT_EMAIL_TEMPLATE: &str = r#"
  <h2>{{rule_name}}</h2>
  <p>An alert rule fired and opened an incident.</p>
  <ul>
    <li>Severity: {{severity}}</li>
    <li>Observed value: {{value}}</li>
    <li>Threshold: {{threshold}}</li>
    <li>Triggered at: {{triggered_at}}</li>
  </ul>
  <p>Incident id: {{incident_id}}</p>
"#;

#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub channel: ChannelKind,
    pub success: bool,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl AlertNotification {
    fn ok(channel: ChannelKind) -> Self {
        Self {
            channel,
            success: true,
            error: None,
            sent_at: Utc::now(),
        }
    }

    fn failed(channel: ChannelKind, error: impl Into<String>) -> Self {
        Self {
            channel,
            success: false,
            error: Some(error.into()),
            sent_at: Utc::now(),
        }
    }
}

/// Multi-channel incident notification. Channel failures are recorded and
/// never block the other channels.
#[derive(Clone)]
pub struct Notifier {
    http: HttpClient,
    transport: Option<Arc<dyn EmailTransport>>,
    from_email: String,
    from_name: String,
}

impl Notifier {
    pub fn new(
        http: HttpClient,
        transport: Option<Arc<dyn EmailTransport>>,
        from_email: String,
        from_name: String,
    ) -> Self {
        Self {
            http,
            transport,
            from_email,
            from_name,
        }
    }

    pub async fn dispatch(
        &self,
        rule: &AlertRule,
        incident: &AlertIncident,
    ) -> Vec<AlertNotification> {
        let mut notifications = Vec::new();
        for channel in rule.channels.iter().filter(|channel| channel.enabled) {
            let outcome = match channel.kind {
                ChannelKind::Email => self.send_email(channel, rule, incident).await,
                ChannelKind::Webhook => self.send_webhook(channel, incident).await,
                ChannelKind::Chat => self.send_chat(channel, rule, incident).await,
                ChannelKind::Sms => Err("sms transport not configured".to_string()),
            };
            let notification = match outcome {
                Ok(()) => AlertNotification::ok(channel.kind),
                Err(error) => {
                    tracing::warn!(
                        "Alert notification via {} failed for rule {}: {}",
                        channel.kind,
                        rule.id,
                        error
                    );
                    AlertNotification::failed(channel.kind, error)
                }
            };
            notifications.push(notification);
        }
        notifications
    }

    async fn send_email(
        &self,
        channel: &AlertChannel,
        rule: &AlertRule,
        incident: &AlertIncident,
    ) -> Result<(), String> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| "email transport not configured".to_string())?;
        let to = channel
            .config
            .get("to")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "email channel is missing 'to'".to_string())?;

        let rule_name = rule.name.clone();
        let severity = incident.severity.to_string();
        let value = incident.value;
        let threshold = incident.threshold;
        let triggered_at = incident.triggered_at.to_rfc3339();
        let incident_id = incident.id.clone();
        let html = render!(
            ALERT_EMAIL_TEMPLATE,
            rule_name,
            severity,
            value,
            threshold,
            triggered_at,
            incident_id
        );

        transport
            .send(&OutgoingEmail {
                to_email: to.to_string(),
                to_name: None,
                from_email: self.from_email.clone(),
                from_name: Some(self.from_name.clone()),
                subject: format!("[{}] {}", incident.severity, rule.name),
                html,
                text: None,
            })
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn send_webhook(
        &self,
        channel: &AlertChannel,
        incident: &AlertIncident,
    ) -> Result<(), String> {
        let url = channel
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "webhook channel is missing 'url'".to_string())?;

        let mut request = self.http.post(url).json(&serde_json::json!({
            "incident": incident,
            "timestamp": Utc::now().to_rfc3339(),
            "type": "alert",
        }));
        if let Some(headers) = channel.config.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("webhook returned {}", response.status()))
        }
    }

    async fn send_chat(
        &self,
        channel: &AlertChannel,
        rule: &AlertRule,
        incident: &AlertIncident,
    ) -> Result<(), String> {
        let url = channel
            .config
            .get("webhook_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "chat channel is missing 'webhook_url'".to_string())?;

        let payload = serde_json::json!({
            "attachments": [{
                "color": incident.severity.color(),
                "title": rule.name,
                "fields": [
                    { "title": "Severity", "value": incident.severity.to_string(), "short": true },
                    { "title": "Status", "value": incident.status.to_string(), "short": true },
                    { "title": "Value", "value": incident.value.to_string(), "short": true },
                    { "title": "Threshold", "value": incident.threshold.to_string(), "short": true },
                    { "title": "Triggered", "value": incident.triggered_at.to_rfc3339(), "short": false },
                ],
            }]
        });

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("chat webhook returned {}", response.status()))
        }
    }
}
