mod manager;
mod notify;
mod rules;

pub use manager::{AlertIncident, AlertManager, IncidentStatus};
pub use notify::{AlertNotification, Notifier};
pub use rules::{default_rules, AlertChannel, AlertCondition, AlertRule, AlertSeverity, ChannelKind};
