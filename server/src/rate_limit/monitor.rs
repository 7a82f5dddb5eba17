use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::metrics::{domain, MetricsCollector};

const SLIDING_WINDOW: Duration = Duration::from_secs(60);
const TOP_K: usize = 10;
// more than half of recent traffic blocked is an attack signature
const GLOBAL_BLOCK_RATE_ALERT: f64 = 0.5;

/// One observed check, as reported by the request path.
#[derive(Debug, Clone)]
pub struct RateLimitEvent {
    pub identifier: String,
    pub profile: String,
    pub allowed: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub window_requests: u64,
    pub window_blocked: u64,
    pub block_rate: f64,
    pub top_by_requests: Vec<(String, u64)>,
    pub top_by_blocks: Vec<(String, u64)>,
}

struct MonitorInner {
    events: VecDeque<(Instant, String, bool)>,
}

impl MonitorInner {
    fn prune(&mut self, now: Instant) {
        while let Some((at, _, _)) = self.events.front() {
            if now.duration_since(*at) > SLIDING_WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_for(&self, identifier: &str) -> u64 {
        self.events
            .iter()
            .filter(|(_, id, _)| id == identifier)
            .count() as u64
    }
}

/// Sliding one-minute view over rate-limit traffic: top talkers, top
/// blocked identifiers and the global block rate. Raises local alerts in
/// the log stream when traffic looks abusive; the alert manager picks up
/// the mirrored `ratelimit.*` metrics for rule-driven alerting.
#[derive(Clone)]
pub struct RateLimitMonitor {
    inner: Arc<Mutex<MonitorInner>>,
    metrics: MetricsCollector,
    suspicious_threshold: u64,
}

impl RateLimitMonitor {
    pub fn new(metrics: MetricsCollector, suspicious_threshold: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MonitorInner {
                events: VecDeque::new(),
            })),
            metrics,
            suspicious_threshold,
        }
    }

    pub async fn record(&self, event: RateLimitEvent) {
        let now = Instant::now();
        let (identifier_count, block_rate) = {
            let mut inner = self.inner.lock().expect("rate limit monitor poisoned");
            inner.prune(now);
            inner
                .events
                .push_back((now, event.identifier.clone(), event.allowed));

            let total = inner.events.len() as u64;
            let blocked = inner.events.iter().filter(|(_, _, ok)| !ok).count() as u64;
            let rate = if total > 0 {
                blocked as f64 / total as f64
            } else {
                0.0
            };
            (inner.count_for(&event.identifier), rate)
        };

        self.metrics
            .record_rate_limit_hit(&event.profile, event.allowed, 0)
            .await;
        self.metrics
            .record(
                domain::API_LATENCY,
                event.latency_ms as f64,
                Some(HashMap::from([(
                    "source".to_string(),
                    "ratelimit".to_string(),
                )])),
            )
            .await;

        if identifier_count > self.suspicious_threshold {
            tracing::warn!(
                security_event = true,
                identifier = %event.identifier,
                count = identifier_count,
                "Suspicious request volume from a single identifier"
            );
        }
        if block_rate > GLOBAL_BLOCK_RATE_ALERT {
            tracing::warn!(
                security_event = true,
                block_rate = block_rate,
                "Global rate-limit block rate above threshold"
            );
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let mut inner = self.inner.lock().expect("rate limit monitor poisoned");
        inner.prune(Instant::now());

        let mut by_requests: HashMap<String, u64> = HashMap::new();
        let mut by_blocks: HashMap<String, u64> = HashMap::new();
        let mut blocked = 0u64;
        for (_, identifier, allowed) in &inner.events {
            *by_requests.entry(identifier.clone()).or_default() += 1;
            if !allowed {
                blocked += 1;
                *by_blocks.entry(identifier.clone()).or_default() += 1;
            }
        }

        let total = inner.events.len() as u64;
        MonitorSnapshot {
            window_requests: total,
            window_blocked: blocked,
            block_rate: if total > 0 {
                blocked as f64 / total as f64
            } else {
                0.0
            },
            top_by_requests: top_k(by_requests),
            top_by_blocks: top_k(by_blocks),
        }
    }
}

fn top_k(counts: HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_K);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_store::SharedStore;

    fn monitor() -> RateLimitMonitor {
        let metrics = MetricsCollector::new(SharedStore::in_memory(), 1);
        RateLimitMonitor::new(metrics, 100)
    }

    fn event(identifier: &str, allowed: bool) -> RateLimitEvent {
        RateLimitEvent {
            identifier: identifier.to_string(),
            profile: "api_standard".to_string(),
            allowed,
            latency_ms: 5,
        }
    }

    #[tokio::test]
    async fn snapshot_ranks_top_talkers() {
        let monitor = monitor();
        for _ in 0..3 {
            monitor.record(event("chatty", true)).await;
        }
        monitor.record(event("quiet", true)).await;
        monitor.record(event("blocked", false)).await;

        let snap = monitor.snapshot();
        assert_eq!(snap.window_requests, 5);
        assert_eq!(snap.window_blocked, 1);
        assert_eq!(snap.top_by_requests[0], ("chatty".to_string(), 3));
        assert_eq!(snap.top_by_blocks, vec![("blocked".to_string(), 1)]);
        assert!((snap.block_rate - 0.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn events_feed_the_metrics_collector() {
        let metrics = MetricsCollector::new(SharedStore::in_memory(), 1);
        let monitor = RateLimitMonitor::new(metrics.clone(), 100);
        monitor.record(event("a", true)).await;
        monitor.record(event("a", false)).await;

        assert_eq!(metrics.get(domain::RATELIMIT_HITS, 1).await.len(), 2);
        assert_eq!(metrics.get(domain::RATELIMIT_BLOCKED, 1).await.len(), 1);
    }
}
