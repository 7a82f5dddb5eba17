use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::shared_store::{SharedStore, StoreCmd};

use super::RateLimitProfile;

/// Resolved window configuration. Named profiles resolve to one of these;
/// callers with bespoke budgets (tests, internal gates) can build their own.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max: u32,
    pub message: String,
    pub prefix: String,
}

impl RateLimitProfile {
    pub fn config(self) -> RateLimitConfig {
        RateLimitConfig {
            window_ms: self.window_ms(),
            max: self.max(),
            message: self.message().to_string(),
            prefix: self.prefix().to_string(),
        }
    }
}

/// Outcome of a rate-limit check, carrying the quota metadata that the
/// HTTP layer turns into `X-RateLimit-*` headers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: Option<u64>,
    pub message: String,
}

#[derive(Debug)]
struct LocalBucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window counter over the shared store, with an in-process bucket
/// map when the store is degraded. Checks never fail: a broken store
/// means the caller proceeds under the fallback's accounting.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    buckets: Arc<RwLock<HashMap<String, Arc<Mutex<LocalBucket>>>>>,
}

impl RateLimiter {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(prefix: &str, identifier: &str) -> String {
        format!("rl:{prefix}:{identifier}")
    }

    pub async fn check(&self, identifier: &str, profile: RateLimitProfile) -> RateLimitDecision {
        self.check_config(identifier, &profile.config()).await
    }

    pub async fn check_config(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> RateLimitDecision {
        if self.store.is_ready() {
            self.check_networked(identifier, config).await
        } else {
            self.check_local(identifier, config)
        }
    }

    async fn check_networked(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> RateLimitDecision {
        let key = Self::key(&config.prefix, identifier);
        let max = config.max as i64;

        // Deny without incrementing once the window is full, so the stored
        // count never grows past the cap under sequential traffic.
        let current = self
            .store
            .get(&key)
            .await
            .and_then(|s| s.parse::<i64>().ok());
        if let Some(count) = current {
            if count >= max {
                let ttl = self.store.pttl(&key).await.max(0) as u64;
                return Self::denied(config, ttl);
            }
        }

        let replies = self
            .store
            .pipeline(vec![
                StoreCmd::Incr(key.clone()),
                StoreCmd::PTtl(key.clone()),
            ])
            .await;
        let count = replies.first().map(|r| r.as_int()).unwrap_or(1);
        let mut ttl_ms = replies.get(1).map(|r| r.as_int()).unwrap_or(-1);

        // The expiry is set only on window creation: an INCR that returned 1
        // started the window. A negative TTL means the key predates us but
        // lost its expiry, so re-arm it rather than leak the bucket.
        if count == 1 || ttl_ms < 0 {
            self.store.pexpire(&key, config.window_ms).await;
            ttl_ms = config.window_ms as i64;
        }

        if count > max {
            // lost a race against concurrent increments; still deny
            return Self::denied(config, ttl_ms as u64);
        }

        RateLimitDecision {
            allowed: true,
            limit: config.max,
            remaining: (max - count).max(0) as u32,
            reset_at: Utc::now() + ChronoDuration::milliseconds(ttl_ms),
            retry_after_secs: None,
            message: config.message.clone(),
        }
    }

    fn check_local(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let key = Self::key(&config.prefix, identifier);
        let bucket = self.local_bucket(&key);
        let mut bucket = bucket.lock().expect("rate limit bucket poisoned");

        let now = Utc::now();
        let max = config.max;

        if now >= bucket.reset_at {
            bucket.count = 1;
            bucket.reset_at = now + ChronoDuration::milliseconds(config.window_ms as i64);
            return RateLimitDecision {
                allowed: true,
                limit: max,
                remaining: max - 1,
                reset_at: bucket.reset_at,
                retry_after_secs: None,
                message: config.message.clone(),
            };
        }

        if bucket.count >= max {
            let retry_ms = (bucket.reset_at - now).num_milliseconds().max(0) as u64;
            return RateLimitDecision {
                allowed: false,
                limit: max,
                remaining: 0,
                reset_at: bucket.reset_at,
                retry_after_secs: Some(retry_ms.div_ceil(1_000).max(1)),
                message: config.message.clone(),
            };
        }

        bucket.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: max,
            remaining: max - bucket.count,
            reset_at: bucket.reset_at,
            retry_after_secs: None,
            message: config.message.clone(),
        }
    }

    fn local_bucket(&self, key: &str) -> Arc<Mutex<LocalBucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .expect("rate limit map poisoned")
            .get(key)
        {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().expect("rate limit map poisoned");
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LocalBucket {
                    count: 0,
                    reset_at: Utc::now(),
                }))
            })
            .clone()
    }

    fn denied(config: &RateLimitConfig, ttl_ms: u64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            limit: config.max,
            remaining: 0,
            reset_at: Utc::now() + ChronoDuration::milliseconds(ttl_ms as i64),
            retry_after_secs: Some(ttl_ms.div_ceil(1_000).max(1)),
            message: config.message.clone(),
        }
    }

    /// Forget everything recorded for this identifier under the profile.
    pub async fn reset(&self, identifier: &str, profile: RateLimitProfile) {
        let key = Self::key(profile.prefix(), identifier);
        self.store.del(&key).await;
        self.buckets
            .write()
            .expect("rate limit map poisoned")
            .remove(&key);
    }

    pub async fn remaining(&self, identifier: &str, profile: RateLimitProfile) -> u32 {
        let max = profile.max() as i64;
        let key = Self::key(profile.prefix(), identifier);
        let count = if self.store.is_ready() {
            self.store
                .get(&key)
                .await
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
        } else {
            self.local_count(&key)
        };
        (max - count).max(0) as u32
    }

    pub async fn reset_at(
        &self,
        identifier: &str,
        profile: RateLimitProfile,
    ) -> Option<DateTime<Utc>> {
        let key = Self::key(profile.prefix(), identifier);
        if self.store.is_ready() {
            let ttl = self.store.pttl(&key).await;
            (ttl >= 0).then(|| Utc::now() + ChronoDuration::milliseconds(ttl))
        } else {
            let buckets = self.buckets.read().expect("rate limit map poisoned");
            let bucket = buckets.get(&key)?;
            let bucket = bucket.lock().expect("rate limit bucket poisoned");
            (bucket.reset_at > Utc::now()).then_some(bucket.reset_at)
        }
    }

    fn local_count(&self, key: &str) -> i64 {
        let buckets = self.buckets.read().expect("rate limit map poisoned");
        match buckets.get(key) {
            Some(bucket) => {
                let bucket = bucket.lock().expect("rate limit bucket poisoned");
                if Utc::now() >= bucket.reset_at {
                    0
                } else {
                    bucket.count as i64
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn limiter() -> RateLimiter {
        RateLimiter::new(SharedStore::in_memory())
    }

    fn tiny_config() -> RateLimitConfig {
        RateLimitConfig {
            window_ms: 60_000,
            max: 2,
            message: "slow down".to_string(),
            prefix: "tiny".to_string(),
        }
    }

    #[tokio::test]
    async fn third_check_is_denied_with_retry_metadata() {
        let rl = limiter();
        let config = tiny_config();

        let first = rl.check_config("u1", &config).await;
        let second = rl.check_config("u1", &config).await;
        let third = rl.check_config("u1", &config).await;

        assert!(first.allowed);
        assert!(second.allowed);
        assert!(!third.allowed);
        assert_eq!(
            [first.remaining, second.remaining, third.remaining],
            [1, 0, 0]
        );
        assert!(third.retry_after_secs.unwrap_or(0) > 0);
        assert!(third.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn identifiers_are_isolated() {
        let rl = limiter();
        for _ in 0..5 {
            rl.check("a", RateLimitProfile::AuthStrict).await;
        }
        assert_eq!(rl.remaining("a", RateLimitProfile::AuthStrict).await, 0);
        assert_eq!(rl.remaining("b", RateLimitProfile::AuthStrict).await, 5);

        let fresh = rl.check("b", RateLimitProfile::AuthStrict).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
    }

    #[tokio::test]
    async fn empty_identifier_is_its_own_bucket() {
        let rl = limiter();
        rl.check("", RateLimitProfile::AuthStrict).await;
        rl.check("", RateLimitProfile::AuthStrict).await;
        assert_eq!(rl.remaining("", RateLimitProfile::AuthStrict).await, 3);
        assert_eq!(rl.remaining("x", RateLimitProfile::AuthStrict).await, 5);
    }

    #[tokio::test]
    async fn burst_profile_survives_parallel_checks() {
        let rl = limiter();
        let checks = (0..10).map(|_| {
            let rl = rl.clone();
            async move { rl.check("c1", RateLimitProfile::ApiBurst).await }
        });
        let decisions = join_all(checks).await;
        assert!(decisions.iter().all(|d| d.allowed));

        let eleventh = rl.check("c1", RateLimitProfile::ApiBurst).await;
        assert!(eleventh.allowed);
        assert_eq!(eleventh.remaining, 89);
    }

    #[tokio::test]
    async fn reset_clears_the_bucket() {
        let rl = limiter();
        for _ in 0..5 {
            rl.check("gone", RateLimitProfile::AuthStrict).await;
        }
        assert!(!rl.check("gone", RateLimitProfile::AuthStrict).await.allowed);

        rl.reset("gone", RateLimitProfile::AuthStrict).await;
        let decision = rl.check("gone", RateLimitProfile::AuthStrict).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn window_rollover_restarts_the_count() {
        let rl = limiter();
        let config = tiny_config();
        rl.check_config("roll", &config).await;
        rl.check_config("roll", &config).await;
        assert!(!rl.check_config("roll", &config).await.allowed);

        // force the window boundary into the past
        {
            let buckets = rl.buckets.read().unwrap();
            let bucket = buckets.get("rl:tiny:roll").unwrap();
            bucket.lock().unwrap().reset_at = Utc::now() - ChronoDuration::milliseconds(1);
        }

        let decision = rl.check_config("roll", &config).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn unknown_profile_defaults_to_standard_budget() {
        let rl = limiter();
        let decision = rl
            .check("whoever", RateLimitProfile::from_name("NO_SUCH_PROFILE"))
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 1_000);
    }
}
