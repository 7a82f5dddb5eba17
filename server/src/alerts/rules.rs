use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::metrics::domain;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertCondition {
    Gt,
    Lt,
    Eq,
    Ne,
    Gte,
    Lte,
}

impl AlertCondition {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Gt => value > threshold,
            AlertCondition::Lt => value < threshold,
            AlertCondition::Eq => value == threshold,
            AlertCondition::Ne => value != threshold,
            AlertCondition::Gte => value >= threshold,
            AlertCondition::Lte => value <= threshold,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Card color used by the chat channel.
    pub fn color(self) -> &'static str {
        match self {
            AlertSeverity::Low => "#36a64f",
            AlertSeverity::Medium => "#ff9900",
            AlertSeverity::High => "#ff0000",
            AlertSeverity::Critical => "#8b0000",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Webhook,
    Chat,
    Sms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertChannel {
    pub kind: ChannelKind,
    pub config: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub duration_minutes: u32,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub channels: Vec<AlertChannel>,
    pub cooldown_minutes: u32,
}

impl AlertRule {
    fn builtin(
        id: &str,
        name: &str,
        metric: &str,
        condition: AlertCondition,
        threshold: f64,
        duration_minutes: u32,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            metric: metric.to_string(),
            condition,
            threshold,
            duration_minutes,
            severity,
            enabled: true,
            channels: Vec::new(),
            cooldown_minutes: 15,
        }
    }
}

/// Rules registered on boot.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::builtin(
            "high-api-latency",
            "High API latency",
            domain::API_LATENCY,
            AlertCondition::Gt,
            2_000.0,
            2,
            AlertSeverity::High,
        ),
        AlertRule::builtin(
            "high-error-rate",
            "High API error rate",
            domain::API_ERRORS,
            AlertCondition::Gt,
            5.0,
            5,
            AlertSeverity::High,
        ),
        AlertRule::builtin(
            "memory-warning",
            "Memory usage warning",
            domain::SYSTEM_MEMORY_USAGE_PERCENT,
            AlertCondition::Gt,
            85.0,
            5,
            AlertSeverity::Medium,
        ),
        AlertRule::builtin(
            "memory-critical",
            "Memory usage critical",
            domain::SYSTEM_MEMORY_USAGE_PERCENT,
            AlertCondition::Gt,
            95.0,
            2,
            AlertSeverity::Critical,
        ),
        AlertRule::builtin(
            "webhook-burst",
            "Webhook traffic burst",
            domain::RATELIMIT_HITS,
            AlertCondition::Gt,
            100.0,
            1,
            AlertSeverity::Medium,
        ),
        AlertRule::builtin(
            "email-bounce-rate",
            "Email bounce rate",
            domain::EMAIL_BOUNCED,
            AlertCondition::Gt,
            10.0,
            10,
            AlertSeverity::High,
        ),
        AlertRule::builtin(
            "service-down",
            "Service down",
            domain::HEALTH_STATUS,
            AlertCondition::Eq,
            0.0,
            1,
            AlertSeverity::Critical,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_compare_as_named() {
        assert!(AlertCondition::Gt.holds(3.0, 2.0));
        assert!(!AlertCondition::Gt.holds(2.0, 2.0));
        assert!(AlertCondition::Gte.holds(2.0, 2.0));
        assert!(AlertCondition::Lt.holds(1.0, 2.0));
        assert!(AlertCondition::Eq.holds(0.0, 0.0));
        assert!(AlertCondition::Ne.holds(1.0, 0.0));
        assert!(AlertCondition::Lte.holds(2.0, 2.0));
    }

    #[test]
    fn default_rules_cover_the_boot_set() {
        let rules = default_rules();
        assert_eq!(rules.len(), 7);
        assert!(rules.iter().all(|rule| rule.enabled));
        let service_down = rules.iter().find(|rule| rule.id == "service-down").unwrap();
        assert_eq!(service_down.metric, domain::HEALTH_STATUS);
        assert_eq!(service_down.severity, AlertSeverity::Critical);
    }
}
