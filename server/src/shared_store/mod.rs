//! Shared hot-state store: a networked primary with an in-process fallback.
//!
//! Every component talks to [`SharedStore`]; none of them handle store
//! errors. A failing primary logs a warning, flips the readiness flag and
//! the call is served by the in-process map instead. A background probe
//! re-pings the primary so a recovered server is picked up without a
//! restart.

mod memory_store;
mod redis_store;

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Arc,
};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::server_config::RedisConfig;
pub(crate) use memory_store::MemoryStore;
pub(crate) use redis_store::RedisStore;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// One command of the capability set in §store. Pipelines are ordered
/// slices of these.
#[derive(Debug, Clone)]
pub enum StoreCmd {
    Get(String),
    Set(String, String),
    SetEx(String, String, u64),
    Incr(String),
    Expire(String, u64),
    PExpire(String, u64),
    /// Remaining lifetime in milliseconds; negative when absent or unset.
    PTtl(String),
    Del(String),
    LPush(String, String),
    LTrim(String, i64, i64),
    LRange(String, i64, i64),
    ZAdd(String, f64, String),
    ZRemRangeByScore(String, f64, f64),
    ZCard(String),
    HIncrBy(String, String, i64),
    HGetAll(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Nil,
    Ok,
    Int(i64),
    Str(String),
    List(Vec<String>),
    Map(HashMap<String, String>),
}

impl StoreReply {
    pub fn as_int(&self) -> i64 {
        match self {
            StoreReply::Int(n) => *n,
            _ => 0,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            StoreReply::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            StoreReply::List(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn into_map(self) -> HashMap<String, String> {
        match self {
            StoreReply::Map(map) => map,
            _ => HashMap::new(),
        }
    }
}

/// Receiving half of a pub/sub subscription. Dropping it unsubscribes.
pub struct Subscription {
    inner: SubscriptionInner,
}

enum SubscriptionInner {
    Broadcast(broadcast::Receiver<String>),
    Channel(mpsc::Receiver<String>),
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<String> {
        match &mut self.inner {
            SubscriptionInner::Broadcast(rx) => loop {
                match rx.recv().await {
                    Ok(msg) => return Some(msg),
                    // A lagged subscriber skips ahead; missed progress events
                    // are superseded by the next one anyway.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            SubscriptionInner::Channel(rx) => rx.recv().await,
        }
    }
}

#[derive(Clone)]
pub struct SharedStore {
    redis: Option<RedisStore>,
    memory: MemoryStore,
    ready: Arc<AtomicBool>,
}

impl SharedStore {
    /// Connect to the networked store; degrade silently when it is not
    /// there. Never fails.
    pub async fn connect(cfg: &RedisConfig) -> Self {
        let redis = match RedisStore::connect(cfg).await {
            Ok(store) => {
                tracing::info!("Connected to shared store at {}:{}", cfg.host, cfg.port);
                Some(store)
            }
            Err(e) => {
                tracing::warn!(
                    "Shared store unavailable ({}), using in-process fallback",
                    e
                );
                None
            }
        };

        let store = Self {
            ready: Arc::new(AtomicBool::new(redis.is_some())),
            redis,
            memory: MemoryStore::new(),
        };
        store.spawn_probe();
        store
    }

    /// A store with no networked primary at all. Used by tests and by the
    /// CLI when it only needs the fallback semantics.
    pub fn in_memory() -> Self {
        Self {
            redis: None,
            memory: MemoryStore::new(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Relaxed)
    }

    fn spawn_probe(&self) {
        let Some(redis) = self.redis.clone() else {
            return;
        };
        let ready = self.ready.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let healthy = redis.ping().await;
                let was_ready = ready.swap(healthy, Relaxed);
                if healthy && !was_ready {
                    tracing::info!("Shared store recovered, leaving fallback mode");
                } else if !healthy && was_ready {
                    tracing::warn!("Shared store unreachable, entering fallback mode");
                }
            }
        });
    }

    async fn exec(&self, cmd: StoreCmd) -> StoreReply {
        if self.is_ready() {
            if let Some(redis) = &self.redis {
                match redis.exec(&cmd).await {
                    Ok(reply) => return reply,
                    Err(e) => {
                        tracing::warn!("Shared store command failed ({}), falling back: {:?}", e, cmd);
                        self.ready.store(false, Relaxed);
                    }
                }
            }
        }
        self.memory.exec(&cmd)
    }

    /// Ordered batch with atomic exec. One reply per command, in order.
    pub async fn pipeline(&self, cmds: Vec<StoreCmd>) -> Vec<StoreReply> {
        if self.is_ready() {
            if let Some(redis) = &self.redis {
                match redis.pipeline(&cmds).await {
                    Ok(replies) => return replies,
                    Err(e) => {
                        tracing::warn!("Shared store pipeline failed ({}), falling back", e);
                        self.ready.store(false, Relaxed);
                    }
                }
            }
        }
        self.memory.pipeline(&cmds)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.exec(StoreCmd::Get(key.to_string())).await.into_string()
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.exec(StoreCmd::Set(key.to_string(), value.to_string()))
            .await;
    }

    pub async fn setex(&self, key: &str, value: &str, ttl_secs: u64) {
        self.exec(StoreCmd::SetEx(key.to_string(), value.to_string(), ttl_secs))
            .await;
    }

    pub async fn incr(&self, key: &str) -> i64 {
        self.exec(StoreCmd::Incr(key.to_string())).await.as_int()
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) {
        self.exec(StoreCmd::Expire(key.to_string(), ttl_secs)).await;
    }

    pub async fn pexpire(&self, key: &str, ttl_ms: u64) {
        self.exec(StoreCmd::PExpire(key.to_string(), ttl_ms)).await;
    }

    pub async fn pttl(&self, key: &str) -> i64 {
        match self.exec(StoreCmd::PTtl(key.to_string())).await {
            StoreReply::Int(ms) => ms,
            _ => -2,
        }
    }

    pub async fn del(&self, key: &str) {
        self.exec(StoreCmd::Del(key.to_string())).await;
    }

    pub async fn lpush(&self, key: &str, value: &str) -> i64 {
        self.exec(StoreCmd::LPush(key.to_string(), value.to_string()))
            .await
            .as_int()
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) {
        self.exec(StoreCmd::LTrim(key.to_string(), start, stop)).await;
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        self.exec(StoreCmd::LRange(key.to_string(), start, stop))
            .await
            .into_list()
    }

    pub async fn zadd(&self, key: &str, score: f64, member: &str) {
        self.exec(StoreCmd::ZAdd(key.to_string(), score, member.to_string()))
            .await;
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> i64 {
        self.exec(StoreCmd::ZRemRangeByScore(key.to_string(), min, max))
            .await
            .as_int()
    }

    pub async fn zcard(&self, key: &str) -> i64 {
        self.exec(StoreCmd::ZCard(key.to_string())).await.as_int()
    }

    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> i64 {
        self.exec(StoreCmd::HIncrBy(key.to_string(), field.to_string(), delta))
            .await
            .as_int()
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        self.exec(StoreCmd::HGetAll(key.to_string())).await.into_map()
    }

    pub async fn publish(&self, channel: &str, payload: &str) {
        if self.is_ready() {
            if let Some(redis) = &self.redis {
                match redis.publish(channel, payload).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!("Shared store publish failed ({}), falling back", e);
                        self.ready.store(false, Relaxed);
                    }
                }
            }
        }
        self.memory.publish(channel, payload);
    }

    pub async fn subscribe(&self, channel: &str) -> Subscription {
        if self.is_ready() {
            if let Some(redis) = &self.redis {
                match redis.subscribe(channel).await {
                    Ok(rx) => {
                        return Subscription {
                            inner: SubscriptionInner::Channel(rx),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Shared store subscribe failed ({}), falling back", e);
                        self.ready.store(false, Relaxed);
                    }
                }
            }
        }
        Subscription {
            inner: SubscriptionInner::Broadcast(self.memory.subscribe(channel)),
        }
    }

    /// Health probe against whichever variant currently serves traffic.
    /// The fallback is always reachable.
    pub async fn ping(&self) -> bool {
        if self.is_ready() {
            if let Some(redis) = &self.redis {
                return redis.ping().await;
            }
        }
        true
    }

    /// Whether the networked primary itself answers, regardless of the
    /// readiness flag. Feeds the health checker.
    pub async fn primary_healthy(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.ping().await,
            None => false,
        }
    }
}
