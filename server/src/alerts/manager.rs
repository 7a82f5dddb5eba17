use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::health::HealthChecker;
use crate::metrics::{domain, MetricsCollector};

use super::notify::Notifier;
use super::rules::{AlertRule, AlertSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertIncident {
    pub id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub status: IncidentStatus,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub value: f64,
    pub threshold: f64,
}

/// Rule-driven alerting: threshold evaluation over metric windows, a
/// forward-only incident lifecycle and multi-channel notification. A
/// whole evaluation sweep is single-flighted; rules inside a sweep run in
/// parallel.
#[derive(Clone)]
pub struct AlertManager {
    metrics: MetricsCollector,
    health: HealthChecker,
    notifier: Notifier,
    // IndexMap keeps registration order, so listings show the boot
    // defaults first
    rules: Arc<RwLock<IndexMap<String, AlertRule>>>,
    incidents: Arc<RwLock<Vec<AlertIncident>>>,
    cooldowns: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    is_running: Arc<AtomicBool>,
}

impl AlertManager {
    pub fn new(metrics: MetricsCollector, health: HealthChecker, notifier: Notifier) -> Self {
        Self {
            metrics,
            health,
            notifier,
            rules: Arc::new(RwLock::new(IndexMap::new())),
            incidents: Arc::new(RwLock::new(Vec::new())),
            cooldowns: Arc::new(RwLock::new(HashMap::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_rule(&self, rule: AlertRule) {
        self.rules
            .write()
            .expect("alert rules poisoned")
            .insert(rule.id.clone(), rule);
    }

    pub fn register_defaults(&self) {
        for rule in super::rules::default_rules() {
            self.register_rule(rule);
        }
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.rules
            .write()
            .expect("alert rules poisoned")
            .shift_remove(rule_id)
            .is_some()
    }

    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> AppResult<()> {
        let mut rules = self.rules.write().expect("alert rules poisoned");
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| AppError::NotFound(format!("alert rule {rule_id} not found")))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules
            .read()
            .expect("alert rules poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn incidents(&self, status: Option<IncidentStatus>) -> Vec<AlertIncident> {
        self.incidents
            .read()
            .expect("alert incidents poisoned")
            .iter()
            .filter(|incident| status.map_or(true, |status| incident.status == status))
            .cloned()
            .collect()
    }

    /// `open → acknowledged`. Any other starting state is rejected.
    pub fn acknowledge(&self, incident_id: &str, by: &str) -> AppResult<AlertIncident> {
        let mut incidents = self.incidents.write().expect("alert incidents poisoned");
        let incident = incidents
            .iter_mut()
            .find(|incident| incident.id == incident_id)
            .ok_or_else(|| AppError::NotFound(format!("incident {incident_id} not found")))?;

        if incident.status != IncidentStatus::Open {
            return Err(AppError::Validation(format!(
                "incident {} is {}, only open incidents can be acknowledged",
                incident_id, incident.status
            )));
        }
        incident.status = IncidentStatus::Acknowledged;
        incident.acknowledged_at = Some(Utc::now());
        incident.acknowledged_by = Some(by.to_string());
        Ok(incident.clone())
    }

    /// `open|acknowledged → resolved`.
    pub fn resolve(&self, incident_id: &str, by: &str) -> AppResult<AlertIncident> {
        let mut incidents = self.incidents.write().expect("alert incidents poisoned");
        let incident = incidents
            .iter_mut()
            .find(|incident| incident.id == incident_id)
            .ok_or_else(|| AppError::NotFound(format!("incident {incident_id} not found")))?;

        if incident.status == IncidentStatus::Resolved {
            return Err(AppError::Validation(format!(
                "incident {incident_id} is already resolved"
            )));
        }
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        incident.resolved_by = Some(by.to_string());
        Ok(incident.clone())
    }

    /// One evaluation sweep over every enabled rule. Re-entrant calls are
    /// dropped while a sweep is in flight.
    pub async fn evaluate_all(&self) {
        if self.is_running.swap(true, SeqCst) {
            tracing::debug!("Alert evaluation already running, skipping tick");
            return;
        }

        let rules: Vec<AlertRule> = self.rules();
        let evaluations = rules.into_iter().filter(|rule| rule.enabled).map(|rule| {
            let manager = self.clone();
            async move { manager.evaluate_rule(&rule).await }
        });
        join_all(evaluations).await;

        self.is_running.store(false, SeqCst);
    }

    async fn evaluate_rule(&self, rule: &AlertRule) {
        if self.in_cooldown(&rule.id) {
            return;
        }

        // health.status is answered by the health checker directly, not
        // read back from the collector
        let value = if rule.metric == domain::HEALTH_STATUS {
            Some(if self.health.check().await.healthy {
                1.0
            } else {
                0.0
            })
        } else {
            self.metrics
                .window_average(&rule.metric, rule.duration_minutes)
                .await
        };

        let Some(value) = value else { return };
        if !rule.condition.holds(value, rule.threshold) {
            return;
        }

        if self.has_open_incident(&rule.id) {
            return;
        }

        let incident = AlertIncident {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            status: IncidentStatus::Open,
            triggered_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            value,
            threshold: rule.threshold,
        };
        tracing::warn!(
            rule = %rule.id,
            value,
            threshold = rule.threshold,
            "Alert rule fired, incident {} opened",
            incident.id
        );

        self.incidents
            .write()
            .expect("alert incidents poisoned")
            .push(incident.clone());
        self.cooldowns
            .write()
            .expect("alert cooldowns poisoned")
            .insert(rule.id.clone(), Utc::now());

        let notifications = self.notifier.dispatch(rule, &incident).await;
        for notification in &notifications {
            if !notification.success {
                tracing::warn!(
                    "Notification via {} for incident {} failed: {:?}",
                    notification.channel,
                    incident.id,
                    notification.error
                );
            }
        }
    }

    fn in_cooldown(&self, rule_id: &str) -> bool {
        let cooldowns = self.cooldowns.read().expect("alert cooldowns poisoned");
        let Some(last_triggered) = cooldowns.get(rule_id) else {
            return false;
        };
        let cooldown_minutes = self
            .rules
            .read()
            .expect("alert rules poisoned")
            .get(rule_id)
            .map(|rule| rule.cooldown_minutes)
            .unwrap_or(0);
        *last_triggered + ChronoDuration::minutes(i64::from(cooldown_minutes)) > Utc::now()
    }

    fn has_open_incident(&self, rule_id: &str) -> bool {
        self.incidents
            .read()
            .expect("alert incidents poisoned")
            .iter()
            .any(|incident| {
                incident.rule_id == rule_id && incident.status != IncidentStatus::Resolved
            })
    }

    /// Periodic evaluation tick; aborts with the runtime.
    pub fn spawn_evaluator(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.evaluate_all().await;
            }
        })
    }
}
