use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::shared_store::{SharedStore, StoreCmd};

use super::sanitizer;

const LIST_CAP: i64 = 1_000;
const TTL_SECS: u64 = 24 * 3_600;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub service: String,
    pub component: String,
    pub message: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: serde_json::Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, service: &str, component: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            service: service.to_string(),
            component: component.to_string(),
            message: message.to_string(),
            trace_id: None,
            user_id: None,
            tags: Vec::new(),
            fields: serde_json::json!({}),
        }
    }

    pub fn with_trace(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_fields(mut self, fields: serde_json::Value) -> Self {
        self.fields = fields;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub service: Option<String>,
    pub component: Option<String>,
    pub trace_id: Option<String>,
    pub user_id: Option<String>,
    pub search: Option<String>,
    pub tags: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

/// Structured log index over the shared store. The write path mirrors the
/// metrics collector: a primary list per `(service, component)`, secondary
/// lists per level / trace / user, hourly counters in a hash, all capped
/// and expiring.
#[derive(Clone)]
pub struct LogIndex {
    store: SharedStore,
}

impl LogIndex {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn primary_key(service: &str, component: &str) -> String {
        format!("logs:{service}:{component}")
    }

    pub async fn write(&self, mut entry: LogEntry) {
        entry.message = sanitizer::sanitize_text(&entry.message);
        entry.fields = sanitizer::sanitize_value(&entry.fields);

        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Could not serialize log entry: {}", e);
                return;
            }
        };

        let mut keys = vec![
            Self::primary_key(&entry.service, &entry.component),
            format!("logs:service:{}", entry.service),
            format!("logs:level:{}", entry.level),
        ];
        if let Some(trace_id) = &entry.trace_id {
            keys.push(format!("logs:trace:{trace_id}"));
        }
        if let Some(user_id) = &entry.user_id {
            keys.push(format!("logs:user:{user_id}"));
        }

        let mut cmds = Vec::with_capacity(keys.len() * 3 + 2);
        for key in &keys {
            cmds.push(StoreCmd::LPush(key.clone(), payload.clone()));
            cmds.push(StoreCmd::LTrim(key.clone(), 0, LIST_CAP - 1));
            cmds.push(StoreCmd::Expire(key.clone(), TTL_SECS));
        }

        let counter_key = format!(
            "logs:counts:{}:{}",
            entry.service,
            entry.timestamp.format("%Y-%m-%d-%H")
        );
        cmds.push(StoreCmd::HIncrBy(
            counter_key.clone(),
            entry.level.to_string(),
            1,
        ));
        cmds.push(StoreCmd::Expire(counter_key, TTL_SECS));

        self.store.pipeline(cmds).await;
    }

    /// Filtered, paginated query. The most selective available index list
    /// is scanned, then every remaining filter is applied in process.
    pub async fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let key = if let Some(trace_id) = &query.trace_id {
            format!("logs:trace:{trace_id}")
        } else if let Some(user_id) = &query.user_id {
            format!("logs:user:{user_id}")
        } else if let (Some(service), Some(component)) = (&query.service, &query.component) {
            Self::primary_key(service, component)
        } else if let Some(service) = &query.service {
            format!("logs:service:{service}")
        } else if let Some(level) = &query.level {
            format!("logs:level:{level}")
        } else {
            tracing::debug!("Log query without an indexable filter");
            return Vec::new();
        };

        let raw = self.store.lrange(&key, 0, LIST_CAP - 1).await;
        let limit = if query.limit == 0 { 50 } else { query.limit };

        raw.iter()
            .filter_map(|item| serde_json::from_str::<LogEntry>(item).ok())
            .filter(|entry| Self::matches(entry, query))
            .skip(query.offset)
            .take(limit)
            .collect()
    }

    /// Per-level counters for one service and hour bucket.
    pub async fn counts(&self, service: &str, hour: DateTime<Utc>) -> Vec<(String, i64)> {
        let key = format!("logs:counts:{}:{}", service, hour.format("%Y-%m-%d-%H"));
        self.store
            .hgetall(&key)
            .await
            .into_iter()
            .map(|(level, count)| (level, count.parse().unwrap_or(0)))
            .collect()
    }

    fn matches(entry: &LogEntry, query: &LogQuery) -> bool {
        if let Some(level) = query.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(service) = &query.service {
            if &entry.service != service {
                return false;
            }
        }
        if let Some(component) = &query.component {
            if &entry.component != component {
                return false;
            }
        }
        if let Some(trace_id) = &query.trace_id {
            if entry.trace_id.as_deref() != Some(trace_id.as_str()) {
                return false;
            }
        }
        if let Some(user_id) = &query.user_id {
            if entry.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(search) = &query.search {
            if !entry.message.contains(search.as_str()) {
                return false;
            }
        }
        if !query.tags.is_empty() && !query.tags.iter().all(|tag| entry.tags.contains(tag)) {
            return false;
        }
        if let Some(start) = query.start_time {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = query.end_time {
            if entry.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LogIndex {
        LogIndex::new(SharedStore::in_memory())
    }

    #[tokio::test]
    async fn write_then_query_by_service_component() {
        let logs = index();
        logs.write(LogEntry::new(
            LogLevel::Info,
            "api",
            "campaigns",
            "campaign created",
        ))
        .await;
        logs.write(LogEntry::new(LogLevel::Error, "api", "campaigns", "boom"))
            .await;

        let found = logs
            .query(&LogQuery {
                service: Some("api".to_string()),
                component: Some("campaigns".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(found.len(), 2);

        let errors = logs
            .query(&LogQuery {
                level: Some(LogLevel::Error),
                ..Default::default()
            })
            .await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
    }

    #[tokio::test]
    async fn trace_index_and_search_filter() {
        let logs = index();
        logs.write(
            LogEntry::new(LogLevel::Info, "worker", "import", "batch 1 done").with_trace("t-1"),
        )
        .await;
        logs.write(
            LogEntry::new(LogLevel::Info, "worker", "import", "batch 2 done").with_trace("t-1"),
        )
        .await;

        let by_trace = logs
            .query(&LogQuery {
                trace_id: Some("t-1".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_trace.len(), 2);

        let searched = logs
            .query(&LogQuery {
                trace_id: Some("t-1".to_string()),
                search: Some("batch 2".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(searched.len(), 1);
    }

    #[tokio::test]
    async fn messages_are_sanitized_before_indexing() {
        let logs = index();
        logs.write(LogEntry::new(
            LogLevel::Warn,
            "auth",
            "keys",
            "rejected key es_live_abcdef0123456789abcdef0123456789abcdef0123456789 for ada@x.com",
        ))
        .await;

        let found = logs
            .query(&LogQuery {
                level: Some(LogLevel::Warn),
                ..Default::default()
            })
            .await;
        assert!(found[0].message.contains("[REDACTED_API_KEY]"));
        assert!(found[0].message.contains("[REDACTED_EMAIL]"));
        assert!(!found[0].message.contains("es_live_"));
    }

    #[tokio::test]
    async fn counters_track_levels_per_hour() {
        let logs = index();
        logs.write(LogEntry::new(LogLevel::Info, "api", "a", "one"))
            .await;
        logs.write(LogEntry::new(LogLevel::Info, "api", "b", "two"))
            .await;
        logs.write(LogEntry::new(LogLevel::Error, "api", "a", "three"))
            .await;

        let counts = logs.counts("api", Utc::now()).await;
        let info = counts.iter().find(|(level, _)| level == "info").unwrap().1;
        let error = counts.iter().find(|(level, _)| level == "error").unwrap().1;
        assert_eq!(info, 2);
        assert_eq!(error, 1);
    }

    #[tokio::test]
    async fn pagination_applies_offset_and_limit() {
        let logs = index();
        for i in 0..10 {
            logs.write(LogEntry::new(
                LogLevel::Info,
                "api",
                "p",
                &format!("message {i}"),
            ))
            .await;
        }
        let page = logs
            .query(&LogQuery {
                service: Some("api".to_string()),
                component: Some("p".to_string()),
                offset: 2,
                limit: 3,
                ..Default::default()
            })
            .await;
        assert_eq!(page.len(), 3);
        // lists are newest-first
        assert_eq!(page[0].message, "message 7");
    }
}
