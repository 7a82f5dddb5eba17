//! Well-known metric names and tagged recording shortcuts.

use std::collections::HashMap;

use super::MetricsCollector;

pub const API_LATENCY: &str = "api.latency";
pub const API_REQUESTS: &str = "api.requests";
pub const API_ERRORS: &str = "api.errors";

pub const EMAIL_SENT: &str = "email.sent";
pub const EMAIL_DELIVERED: &str = "email.delivered";
pub const EMAIL_BOUNCED: &str = "email.bounced";
pub const EMAIL_OPENED: &str = "email.opened";
pub const EMAIL_CLICKED: &str = "email.clicked";
pub const EMAIL_UNSUBSCRIBED: &str = "email.unsubscribed";

pub const CAMPAIGN_CREATED: &str = "campaign.created";
pub const CAMPAIGN_SENT: &str = "campaign.sent";
pub const CAMPAIGN_COMPLETED: &str = "campaign.completed";
pub const CAMPAIGN_PAUSED: &str = "campaign.paused";

pub const USER_LOGIN: &str = "user.login";
pub const USER_LOGOUT: &str = "user.logout";
pub const USER_SIGNUP: &str = "user.signup";
pub const USER_ACTIVE: &str = "user.active";

pub const RATELIMIT_HITS: &str = "ratelimit.hits";
pub const RATELIMIT_REMAINING: &str = "ratelimit.remaining";
pub const RATELIMIT_BLOCKED: &str = "ratelimit.blocked";

pub const SYSTEM_MEMORY_HEAP_USED: &str = "system.memory.heap_used";
pub const SYSTEM_MEMORY_HEAP_TOTAL: &str = "system.memory.heap_total";
pub const SYSTEM_MEMORY_RSS: &str = "system.memory.rss";
pub const SYSTEM_MEMORY_USAGE_PERCENT: &str = "system.memory.usage_percent";
pub const SYSTEM_UPTIME: &str = "system.uptime";

pub const HEALTH_STATUS: &str = "health.status";

fn tags(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

impl MetricsCollector {
    pub async fn record_api_request(&self, endpoint: &str, status: u16, latency_ms: f64) {
        let status_str = status.to_string();
        let t = tags(&[("endpoint", endpoint), ("status", &status_str)]);
        self.record(API_REQUESTS, 1.0, t.clone()).await;
        self.record(API_LATENCY, latency_ms, t.clone()).await;
        if status >= 500 {
            self.record(API_ERRORS, 1.0, t).await;
        }
    }

    pub async fn record_email_event(&self, name: &'static str, campaign_id: &str) {
        self.record(name, 1.0, tags(&[("campaign_id", campaign_id)]))
            .await;
    }

    pub async fn record_campaign_event(&self, name: &'static str, workspace_id: &str) {
        self.record(name, 1.0, tags(&[("workspace_id", workspace_id)]))
            .await;
    }

    pub async fn record_user_event(&self, name: &'static str, workspace_id: &str) {
        self.record(name, 1.0, tags(&[("workspace_id", workspace_id)]))
            .await;
    }

    pub async fn record_rate_limit_hit(&self, profile: &str, allowed: bool, remaining: u32) {
        let t = tags(&[("profile", profile)]);
        self.record(RATELIMIT_HITS, 1.0, t.clone()).await;
        self.record(RATELIMIT_REMAINING, f64::from(remaining), t.clone())
            .await;
        if !allowed {
            self.record(RATELIMIT_BLOCKED, 1.0, t).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_store::SharedStore;

    #[tokio::test]
    async fn api_errors_recorded_only_for_5xx() {
        let metrics = MetricsCollector::new(SharedStore::in_memory(), 24);
        metrics.record_api_request("/a", 200, 12.0).await;
        metrics.record_api_request("/a", 503, 12.0).await;

        assert_eq!(metrics.get(API_REQUESTS, 1).await.len(), 2);
        let errors = metrics.get(API_ERRORS, 1).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tags.get("status").unwrap(), "503");
    }

    #[tokio::test]
    async fn blocked_hits_count_separately() {
        let metrics = MetricsCollector::new(SharedStore::in_memory(), 24);
        metrics.record_rate_limit_hit("api_burst", true, 99).await;
        metrics.record_rate_limit_hit("api_burst", false, 0).await;

        assert_eq!(metrics.get(RATELIMIT_HITS, 1).await.len(), 2);
        assert_eq!(metrics.get(RATELIMIT_BLOCKED, 1).await.len(), 1);
    }
}
