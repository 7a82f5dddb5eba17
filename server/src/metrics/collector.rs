use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::shared_store::{SharedStore, StoreCmd};

pub const DEFAULT_MAX_POINTS: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: usize,
}

impl MetricSummary {
    fn empty() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            sum: 0.0,
            count: 0,
        }
    }
}

/// Tagged time-series collector. Points live in a per-name ring buffer and
/// are mirrored into the shared store so other processes can read them;
/// the buffer is the fallback when the store is degraded.
#[derive(Clone)]
pub struct MetricsCollector {
    store: SharedStore,
    buffers: Arc<RwLock<HashMap<String, VecDeque<MetricPoint>>>>,
    max_points: usize,
    retention_hours: u32,
}

impl MetricsCollector {
    pub fn new(store: SharedStore, retention_hours: u32) -> Self {
        Self {
            store,
            buffers: Arc::new(RwLock::new(HashMap::new())),
            max_points: DEFAULT_MAX_POINTS,
            retention_hours,
        }
    }

    fn store_key(name: &str) -> String {
        format!("metrics:{name}")
    }

    pub async fn record(&self, name: &str, value: f64, tags: Option<HashMap<String, String>>) {
        let point = MetricPoint {
            name: name.to_string(),
            timestamp: Utc::now(),
            value,
            tags: tags.unwrap_or_default(),
        };

        {
            let mut buffers = self.buffers.write().expect("metrics buffers poisoned");
            let buffer = buffers.entry(name.to_string()).or_default();
            buffer.push_back(point.clone());
            while buffer.len() > self.max_points {
                buffer.pop_front();
            }
        }

        if self.store.is_ready() {
            let key = Self::store_key(name);
            let payload = match serde_json::to_string(&point) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Could not serialize metric point for {}: {}", name, e);
                    return;
                }
            };
            self.store
                .pipeline(vec![
                    StoreCmd::LPush(key.clone(), payload),
                    StoreCmd::LTrim(key.clone(), 0, (self.max_points as i64) - 1),
                    StoreCmd::Expire(key, u64::from(self.retention_hours) * 3_600),
                ])
                .await;
        }
    }

    /// Points for `name` within the last `hours`, oldest first. Reads the
    /// store and falls back to the in-process buffer.
    pub async fn get(&self, name: &str, hours: u32) -> Vec<MetricPoint> {
        let cutoff = Utc::now() - ChronoDuration::hours(i64::from(hours));

        if self.store.is_ready() {
            let raw = self.store.lrange(&Self::store_key(name), 0, -1).await;
            if !raw.is_empty() {
                let mut points: Vec<MetricPoint> = raw
                    .iter()
                    .filter_map(|item| serde_json::from_str(item).ok())
                    .filter(|p: &MetricPoint| p.timestamp >= cutoff)
                    .collect();
                points.sort_by_key(|p| p.timestamp);
                return points;
            }
        }

        let buffers = self.buffers.read().expect("metrics buffers poisoned");
        buffers
            .get(name)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|p| p.timestamp >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn aggregate(points: &[MetricPoint]) -> MetricSummary {
        if points.is_empty() {
            return MetricSummary::empty();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for point in points {
            min = min.min(point.value);
            max = max.max(point.value);
            sum += point.value;
        }
        MetricSummary {
            min,
            max,
            avg: sum / points.len() as f64,
            sum,
            count: points.len(),
        }
    }

    /// Bucketed series: `window_count` buckets of `window_minutes` each,
    /// ending now. Each bucket holds the average of its points.
    pub async fn window(
        &self,
        name: &str,
        window_minutes: u32,
        window_count: u32,
    ) -> Vec<MetricPoint> {
        let span_minutes = i64::from(window_minutes) * i64::from(window_count);
        let hours = (span_minutes as f64 / 60.0).ceil().max(1.0) as u32;
        let points = self.get(name, hours).await;

        let now = Utc::now();
        let bucket_span = ChronoDuration::minutes(i64::from(window_minutes));
        let mut series = Vec::with_capacity(window_count as usize);

        for i in (0..window_count).rev() {
            let end = now - bucket_span * (i as i32);
            let start = end - bucket_span;
            let bucket: Vec<&MetricPoint> = points
                .iter()
                .filter(|p| p.timestamp > start && p.timestamp <= end)
                .collect();
            let value = if bucket.is_empty() {
                0.0
            } else {
                bucket.iter().map(|p| p.value).sum::<f64>() / bucket.len() as f64
            };
            let mut tags = HashMap::new();
            tags.insert("count".to_string(), bucket.len().to_string());
            series.push(MetricPoint {
                name: name.to_string(),
                timestamp: start,
                value,
                tags,
            });
        }

        series
    }

    /// Average over the trailing window, used by alert evaluation. `None`
    /// when no points were recorded in the window.
    pub async fn window_average(&self, name: &str, minutes: u32) -> Option<f64> {
        let hours = (f64::from(minutes) / 60.0).ceil().max(1.0) as u32;
        let cutoff = Utc::now() - ChronoDuration::minutes(i64::from(minutes));
        let points: Vec<MetricPoint> = self
            .get(name, hours)
            .await
            .into_iter()
            .filter(|p| p.timestamp >= cutoff)
            .collect();
        if points.is_empty() {
            return None;
        }
        Some(Self::aggregate(&points).avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(SharedStore::in_memory(), 24)
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let metrics = collector();
        metrics.record("api.latency", 120.0, None).await;
        metrics
            .record(
                "api.latency",
                80.0,
                Some(HashMap::from([(
                    "endpoint".to_string(),
                    "/campaigns".to_string(),
                )])),
            )
            .await;

        let points = metrics.get("api.latency", 1).await;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 120.0);
        assert_eq!(points[1].tags.get("endpoint").unwrap(), "/campaigns");
    }

    #[tokio::test]
    async fn ring_buffer_caps_points() {
        let mut metrics = collector();
        metrics.max_points = 10;
        for i in 0..25 {
            metrics.record("m", f64::from(i), None).await;
        }
        let points = metrics.get("m", 1).await;
        assert_eq!(points.len(), 10);
        assert_eq!(points.first().unwrap().value, 15.0);
        assert_eq!(points.last().unwrap().value, 24.0);
    }

    #[tokio::test]
    async fn aggregate_computes_summary() {
        let metrics = collector();
        for value in [2.0, 4.0, 6.0] {
            metrics.record("agg", value, None).await;
        }
        let summary = MetricsCollector::aggregate(&metrics.get("agg", 1).await);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 6.0);
        assert_eq!(summary.avg, 4.0);
        assert_eq!(summary.sum, 12.0);
        assert_eq!(summary.count, 3);
    }

    #[tokio::test]
    async fn aggregate_of_nothing_is_zeroed() {
        let summary = MetricsCollector::aggregate(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.avg, 0.0);
    }

    #[tokio::test]
    async fn window_produces_requested_bucket_count() {
        let metrics = collector();
        metrics.record("w", 10.0, None).await;
        metrics.record("w", 20.0, None).await;

        let series = metrics.window("w", 1, 5).await;
        assert_eq!(series.len(), 5);
        // both points fall into the newest bucket
        assert_eq!(series.last().unwrap().value, 15.0);
        assert_eq!(series.last().unwrap().tags.get("count").unwrap(), "2");
        assert!(series[..4].iter().all(|p| p.value == 0.0));
    }

    #[tokio::test]
    async fn window_average_for_alerts() {
        let metrics = collector();
        assert_eq!(metrics.window_average("nothing", 5).await, None);
        metrics.record("cpu", 50.0, None).await;
        metrics.record("cpu", 100.0, None).await;
        assert_eq!(metrics.window_average("cpu", 5).await, Some(75.0));
    }
}
