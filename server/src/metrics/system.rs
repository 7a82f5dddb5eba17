use std::time::{Duration, Instant};

use super::{domain, MetricsCollector};

/// Periodic sampler for process memory and uptime.
#[derive(Clone)]
pub struct SystemSampler {
    metrics: MetricsCollector,
    started: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct MemorySnapshot {
    heap_used: f64,
    heap_total: f64,
    rss: f64,
    usage_percent: f64,
}

impl SystemSampler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self {
            metrics,
            started: Instant::now(),
        }
    }

    pub async fn sample(&self) {
        let mem = read_memory();
        self.metrics
            .record(domain::SYSTEM_MEMORY_HEAP_USED, mem.heap_used, None)
            .await;
        self.metrics
            .record(domain::SYSTEM_MEMORY_HEAP_TOTAL, mem.heap_total, None)
            .await;
        self.metrics
            .record(domain::SYSTEM_MEMORY_RSS, mem.rss, None)
            .await;
        self.metrics
            .record(domain::SYSTEM_MEMORY_USAGE_PERCENT, mem.usage_percent, None)
            .await;
        self.metrics
            .record(
                domain::SYSTEM_UPTIME,
                self.started.elapsed().as_secs_f64(),
                None,
            )
            .await;
    }

    /// Detached 60s sampling loop; aborts with the runtime.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.sample().await;
            }
        })
    }
}

#[cfg(target_os = "linux")]
fn read_memory() -> MemorySnapshot {
    use std::fs;

    fn field_kb(content: &str, field: &str) -> Option<f64> {
        content
            .lines()
            .find(|line| line.starts_with(field))?
            .split_whitespace()
            .nth(1)?
            .parse::<f64>()
            .ok()
    }

    let status = fs::read_to_string("/proc/self/status").unwrap_or_default();
    let meminfo = fs::read_to_string("/proc/meminfo").unwrap_or_default();

    let rss = field_kb(&status, "VmRSS:").unwrap_or(0.0) * 1024.0;
    let heap_used = field_kb(&status, "VmData:").unwrap_or(0.0) * 1024.0;
    let heap_total = field_kb(&status, "VmSize:").unwrap_or(0.0) * 1024.0;
    let total = field_kb(&meminfo, "MemTotal:").unwrap_or(0.0) * 1024.0;

    MemorySnapshot {
        heap_used,
        heap_total,
        rss,
        usage_percent: if total > 0.0 { rss / total * 100.0 } else { 0.0 },
    }
}

#[cfg(not(target_os = "linux"))]
fn read_memory() -> MemorySnapshot {
    MemorySnapshot::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_store::SharedStore;

    #[tokio::test]
    async fn sample_records_every_system_metric() {
        let metrics = MetricsCollector::new(SharedStore::in_memory(), 1);
        let sampler = SystemSampler::new(metrics.clone());
        sampler.sample().await;

        for name in [
            domain::SYSTEM_MEMORY_HEAP_USED,
            domain::SYSTEM_MEMORY_HEAP_TOTAL,
            domain::SYSTEM_MEMORY_RSS,
            domain::SYSTEM_MEMORY_USAGE_PERCENT,
            domain::SYSTEM_UPTIME,
        ] {
            assert_eq!(metrics.get(name, 1).await.len(), 1, "missing {name}");
        }
    }
}
