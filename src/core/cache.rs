//! Short-Term Cache (C8, spec.md §4.7).
//!
//! Key: SHA-256 of the normalized NL query. Value: a serialized `Plan`.
//! Backed by an in-process `moka` cache, with an optional Redis store for
//! multi-instance deployments. Redis failures degrade to a cache miss and are
//! logged, never propagated — the same "availability over observability"
//! posture this codebase's audit tooling already takes, applied here to the
//! cache's backing store.

use crate::config::CacheConfig;
use crate::models::{CacheEntry, Plan};
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

pub struct ShortTermCache {
    config: CacheConfig,
    local: moka::future::Cache<String, Vec<u8>>,
    redis_client: Option<redis::Client>,
    stats: CacheStats,
}

impl ShortTermCache {
    pub fn new(config: CacheConfig) -> Self {
        let local = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        let redis_client = if config.redis_url.is_empty() {
            None
        } else {
            match redis::Client::open(config.redis_url.as_str()) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!("short-term cache: failed to build redis client: {e}");
                    None
                },
            }
        };

        Self { config, local, redis_client, stats: CacheStats::default() }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    /// A backing-store error is logged and treated as a miss; it is never
    /// surfaced to the caller.
    pub async fn get(&self, key: &str) -> Option<Plan> {
        if let Some(bytes) = self.local.get(key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return deserialize(&bytes);
        }

        if let Some(bytes) = self.get_from_redis(key).await {
            self.local.insert(key.to_string(), bytes.clone()).await;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return deserialize(&bytes);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Skips the write (but still reports success) when the serialized plan
    /// exceeds `max_value_bytes`. Only successfully validated plans are ever
    /// passed in here — errors are never cached.
    pub async fn set(&self, key: &str, plan: &Plan) {
        let entry = CacheEntry { plan: plan.clone() };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("short-term cache: failed to serialize plan: {e}");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            },
        };

        if bytes.len() > self.config.max_value_bytes {
            tracing::debug!(
                "short-term cache: plan for key {key} is {} bytes, over the {} byte ceiling, skipping",
                bytes.len(),
                self.config.max_value_bytes
            );
            return;
        }

        self.local.insert(key.to_string(), bytes.clone()).await;
        self.set_in_redis(key, &bytes).await;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    async fn get_from_redis(&self, key: &str) -> Option<Vec<u8>> {
        let client = self.redis_client.as_ref()?;
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => match conn.get::<_, Option<Vec<u8>>>(redis_key(key)).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("short-term cache: redis GET failed: {e}");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    None
                },
            },
            Err(e) => {
                tracing::warn!("short-term cache: redis connection failed: {e}");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    async fn set_in_redis(&self, key: &str, bytes: &[u8]) {
        let Some(client) = self.redis_client.as_ref() else { return };
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: redis::RedisResult<()> =
                    conn.set_ex(redis_key(key), bytes, self.config.ttl_seconds).await;
                if let Err(e) = result {
                    tracing::warn!("short-term cache: redis SET failed: {e}");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(e) => {
                tracing::warn!("short-term cache: redis connection failed: {e}");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

fn redis_key(key: &str) -> String {
    format!("sql-gateway:plan:{key}")
}

fn deserialize(bytes: &[u8]) -> Option<Plan> {
    serde_json::from_slice::<CacheEntry>(bytes).ok().map(|entry| entry.plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanSource;

    fn plan() -> Plan {
        Plan {
            sql: "SELECT 1 FROM sales_fact LIMIT 200".to_string(),
            confidence: 0.9,
            explanation: "test".to_string(),
            source: PlanSource::Llm,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_in_process() {
        let cache = ShortTermCache::new(CacheConfig::default());
        cache.set("key-1", &plan()).await;
        let got = cache.get("key-1").await;
        assert_eq!(got.unwrap().sql, plan().sql);
    }

    #[tokio::test]
    async fn miss_is_silent() {
        let cache = ShortTermCache::new(CacheConfig::default());
        assert!(cache.get("missing").await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn oversized_value_is_skipped_but_reports_no_error() {
        let cache = ShortTermCache::new(CacheConfig { max_value_bytes: 1, ..CacheConfig::default() });
        cache.set("key-1", &plan()).await;
        assert!(cache.get("key-1").await.is_none());
        assert_eq!(cache.stats().errors, 0);
    }
}
