//! Tiered cache store: a fast in-memory tier in front of a capacity-bounded
//! durable tier, with three time-based freshness tiers (fresh / stale /
//! expired) interrogated by the request orchestrator.

mod durable;
mod memory;

use self::durable::DurableTier;
use self::memory::MemoryTier;
use crate::domain::{CacheConfig, CacheEntry};
use regex::Regex;
use serde_json::Value;
use shared::config::Config;
use shared::{now_ms, Result};
use std::path::Path;

pub struct TieredStore {
    memory: MemoryTier,
    durable: Option<DurableTier>,
}

impl TieredStore {
    /// Memory-only store; `persist` configs degrade to the fast tier.
    pub fn in_memory() -> Self {
        Self {
            memory: MemoryTier::new(),
            durable: None,
        }
    }

    pub fn open(path: impl AsRef<Path>, budget_bytes: u64) -> Result<Self> {
        Ok(Self {
            memory: MemoryTier::new(),
            durable: Some(DurableTier::open(path, budget_bytes)?),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            Path::new(&config.cache_dir).join("beacon-cache"),
            config.cache_budget_bytes,
        )
    }

    /// Full entry lookup: fast tier first, then the durable tier (restoring
    /// a durable hit into the fast tier). An entry observed at
    /// `age >= max_age` is deleted from both tiers and reported as absent.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = now_ms();
        if let Some(entry) = self.memory.get(key, now) {
            return Some(entry);
        }

        let entry = self.durable.as_ref()?.get(key)?;
        if entry.is_expired(now) {
            self.invalidate(key);
            return None;
        }

        self.memory.insert(key, entry.clone());
        Some(entry)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|entry| entry.data)
    }

    /// Always writes the fast tier; a durable-write failure can never fail
    /// the set.
    pub fn set(&self, key: &str, data: Value, config: &CacheConfig) {
        self.insert_entry(key, CacheEntry::new(data, config), config.persist);
    }

    pub(crate) fn insert_entry(&self, key: &str, entry: CacheEntry, persist: bool) {
        if persist {
            if let Some(durable) = &self.durable {
                durable.put(key, &entry);
            }
        }
        self.memory.insert(key, entry);
    }

    /// Raw lookup for the freshness predicates: no expiry deletion, no
    /// restore into the fast tier. Only a `get` evicts.
    fn peek(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.peek(key) {
            return Some(entry);
        }
        self.durable.as_ref()?.get(key)
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.peek(key)
            .map(|entry| entry.is_fresh(now_ms()))
            .unwrap_or(false)
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.peek(key)
            .map(|entry| entry.is_stale(now_ms()))
            .unwrap_or(false)
    }

    pub fn is_expired(&self, key: &str) -> bool {
        self.peek(key)
            .map(|entry| entry.is_expired(now_ms()))
            .unwrap_or(false)
    }

    pub fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Some(durable) = &self.durable {
            durable.remove(key);
        }
    }

    pub fn invalidate_pattern(&self, pattern: &Regex) {
        self.memory.remove_matching(pattern);
        if let Some(durable) = &self.durable {
            durable.remove_matching(pattern);
        }
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Some(durable) = &self.durable {
            durable.clear();
        }
    }

    /// Flushes the durable tier. Call once at application shutdown.
    pub fn dispose(&self) {
        if let Some(durable) = &self.durable {
            durable.flush();
        }
    }
}
