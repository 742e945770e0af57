use crate::domain::CacheEntry;
use regex::Regex;
use shared::{Error, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Namespace prefix for all durable entries; nothing else in the database
/// shares it, so budget accounting can scan the prefix alone.
const KEY_PREFIX: &str = "beacon::cache::";

/// Durable tier backed by Sled. Values are JSON-serialized [`CacheEntry`]
/// records; a fixed byte budget is enforced across all namespaced entries by
/// evicting oldest-`timestamp`-first.
///
/// Everything past construction is best effort: a durable failure is logged
/// and swallowed, never surfaced, because the cache must not become a new
/// failure source for the feature it accelerates.
pub(crate) struct DurableTier {
    db: sled::Db,
    budget_bytes: u64,
    // Serializes writers so an eviction pass completes before the write it
    // was making room for.
    write_lock: Mutex<()>,
}

impl DurableTier {
    pub(crate) fn open(path: impl AsRef<Path>, budget_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create cache dir: {e}")))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("failed to open cache database: {e}")))?;

        Ok(Self {
            db,
            budget_bytes,
            write_lock: Mutex::new(()),
        })
    }

    fn storage_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    pub(crate) fn get(&self, key: &str) -> Option<CacheEntry> {
        let storage_key = Self::storage_key(key);
        let bytes = match self.db.get(&storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, "durable read failed: {e}");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                // A corrupt record is useless; drop it so it stops counting
                // against the budget.
                warn!(key, "dropping malformed durable entry: {e}");
                let _ = self.db.remove(&storage_key);
                None
            }
        }
    }

    pub(crate) fn put(&self, key: &str, entry: &CacheEntry) {
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, "failed to serialize entry for durable tier: {e}");
                return;
            }
        };

        let storage_key = Self::storage_key(key);
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        // An overwrite releases its old bytes up front. Dropping the old
        // record before the accounting pass keeps it out of both the usage
        // sum and the eviction scan, so its bytes are credited exactly once.
        if let Err(e) = self.db.remove(&storage_key) {
            warn!(key, "durable remove of replaced entry failed: {e}");
        }

        let mut usage = self.usage_bytes();
        while usage + bytes.len() as u64 > self.budget_bytes {
            match self.evict_oldest() {
                Some(freed) => usage = usage.saturating_sub(freed),
                None => break,
            }
        }

        if let Err(e) = self.db.insert(storage_key.as_bytes(), bytes.clone()) {
            // Hard quota from the backend: make room once more, retry exactly
            // once, then give up silently.
            warn!(key, "durable write rejected, evicting and retrying: {e}");
            self.evict_oldest();
            if let Err(e) = self.db.insert(storage_key.as_bytes(), bytes) {
                warn!(key, "durable write failed after retry: {e}");
            }
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        if let Err(e) = self.db.remove(Self::storage_key(key)) {
            warn!(key, "durable remove failed: {e}");
        }
    }

    pub(crate) fn remove_matching(&self, pattern: &Regex) {
        for (storage_key, logical_key) in self.logical_keys() {
            if pattern.is_match(&logical_key) {
                if let Err(e) = self.db.remove(storage_key) {
                    warn!(key = %logical_key, "durable remove failed: {e}");
                }
            }
        }
    }

    pub(crate) fn clear(&self) {
        for (storage_key, _) in self.logical_keys() {
            let _ = self.db.remove(storage_key);
        }
    }

    pub(crate) fn flush(&self) {
        if let Err(e) = self.db.flush() {
            warn!("durable flush failed: {e}");
        }
    }

    pub(crate) fn usage_bytes(&self) -> u64 {
        let mut total = 0u64;
        for item in self.db.scan_prefix(KEY_PREFIX) {
            match item {
                Ok((_, value)) => total += value.len() as u64,
                Err(e) => {
                    warn!("durable scan failed: {e}");
                    break;
                }
            }
        }
        total
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.logical_keys().len()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &str, bytes: &[u8]) {
        self.db
            .insert(Self::storage_key(key).as_bytes(), bytes)
            .unwrap();
    }

    fn logical_keys(&self) -> Vec<(sled::IVec, String)> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(KEY_PREFIX) {
            match item {
                Ok((storage_key, _)) => {
                    let full = String::from_utf8_lossy(&storage_key).into_owned();
                    let logical = full
                        .strip_prefix(KEY_PREFIX)
                        .unwrap_or(full.as_str())
                        .to_string();
                    keys.push((storage_key, logical));
                }
                Err(e) => {
                    warn!("durable scan failed: {e}");
                    break;
                }
            }
        }
        keys
    }

    /// Removes the entry with the smallest `timestamp`. Returns the number
    /// of bytes freed, or `None` when the namespace is already empty.
    fn evict_oldest(&self) -> Option<u64> {
        let mut oldest: Option<(sled::IVec, u64, u64)> = None;
        for item in self.db.scan_prefix(KEY_PREFIX) {
            let (storage_key, value) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("durable scan failed: {e}");
                    break;
                }
            };
            let timestamp = match serde_json::from_slice::<CacheEntry>(&value) {
                Ok(entry) => entry.timestamp,
                // Unreadable entries are the best candidates of all.
                Err(_) => 0,
            };
            let len = value.len() as u64;
            let is_older = oldest
                .as_ref()
                .map(|(_, _, best)| timestamp < *best)
                .unwrap_or(true);
            if is_older {
                oldest = Some((storage_key, len, timestamp));
            }
        }

        let (storage_key, len, timestamp) = oldest?;
        debug!(timestamp, "evicting oldest durable entry");
        match self.db.remove(storage_key) {
            Ok(_) => Some(len),
            Err(e) => {
                warn!("durable eviction failed: {e}");
                None
            }
        }
    }
}
