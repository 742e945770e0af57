use crate::domain::CacheEntry;
use dashmap::DashMap;
use regex::Regex;

/// Fast in-memory tier. Holds full [`CacheEntry`] records so freshness can
/// be judged per entry; entries observed past `max_age` are removed on read.
pub(crate) struct MemoryTier {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryTier {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Some(entry.value().clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Raw lookup without the expiry side effect of [`get`](Self::get).
    pub(crate) fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn insert(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn remove_matching(&self, pattern: &Regex) {
        self.entries.retain(|key, _| !pattern.is_match(key));
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
