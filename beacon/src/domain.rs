use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::now_ms;

/// Cache policy for a resource class, supplied by the caller of the store.
///
/// The three windows are cumulative ages: an entry is served as-is while
/// younger than `ttl_ms`, served-but-revalidated up to `stale_ms`, and
/// dropped entirely once `max_age_ms` is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub stale_ms: u64,
    pub max_age_ms: u64,
    /// Write-through to the durable tier in addition to the fast tier
    pub persist: bool,
}

impl CacheConfig {
    /// Builds a config normalized so that `0 < ttl <= stale <= max_age`
    /// always holds.
    pub fn new(ttl_ms: u64, stale_ms: u64, max_age_ms: u64, persist: bool) -> Self {
        let ttl_ms = ttl_ms.max(1);
        let stale_ms = stale_ms.max(ttl_ms);
        let max_age_ms = max_age_ms.max(stale_ms);
        Self {
            ttl_ms,
            stale_ms,
            max_age_ms,
            persist,
        }
    }
}

/// A single cached value plus the freshness windows it was written with.
/// Created on `set`, read-only afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Write time, epoch milliseconds
    pub timestamp: u64,
    pub ttl_ms: u64,
    pub stale_ms: u64,
    pub max_age_ms: u64,
}

impl CacheEntry {
    pub fn new(data: Value, config: &CacheConfig) -> Self {
        Self {
            data,
            timestamp: now_ms(),
            ttl_ms: config.ttl_ms,
            stale_ms: config.stale_ms,
            max_age_ms: config.max_age_ms,
        }
    }

    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    /// `age < ttl`: serve without refreshing.
    pub fn is_fresh(&self, now: u64) -> bool {
        self.age_ms(now) < self.ttl_ms
    }

    /// `ttl <= age < stale`: serve, but a background refresh is due.
    pub fn is_stale(&self, now: u64) -> bool {
        let age = self.age_ms(now);
        self.ttl_ms <= age && age < self.stale_ms
    }

    /// `age >= max_age`: must not be served at all.
    pub fn is_expired(&self, now: u64) -> bool {
        self.age_ms(now) >= self.max_age_ms
    }
}
