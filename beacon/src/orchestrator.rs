//! Request deduplication and the stale-while-revalidate policy.
//!
//! `resolve` guarantees at most one in-flight request per cache key no
//! matter how many callers ask concurrently: later callers join the first
//! caller's shared future. Cached values are served according to their
//! freshness tier; stale hits answer immediately and refresh in the
//! background.

use crate::domain::CacheConfig;
use crate::store::TieredStore;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use regex::Regex;
use serde_json::Value;
use shared::{now_ms, Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

#[derive(Clone)]
pub struct RequestOrchestrator {
    store: Arc<TieredStore>,
    pending: Arc<DashMap<String, SharedFetch>>,
    // Bumped by `clear` so fetches issued before a full resync can never
    // write their (now foreign) results into the fresh cache.
    epoch: Arc<AtomicU64>,
}

impl RequestOrchestrator {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self {
            store,
            pending: Arc::new(DashMap::new()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    /// Resolves `key` according to the stale-while-revalidate policy.
    ///
    /// `fetch` is only invoked when a network request is actually needed.
    /// A caller-supplied `cancel` token aborts this caller's wait alone;
    /// the underlying request keeps running for any other caller joined to
    /// it, and its result still lands in the cache.
    pub async fn resolve<F, Fut>(
        &self,
        key: &str,
        config: CacheConfig,
        fetch: F,
        cancel: Option<CancellationToken>,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if let Some(in_flight) = self.pending.get(key).map(|entry| entry.value().clone()) {
            debug!(key, "joining in-flight request");
            return Self::wait(in_flight, cancel).await;
        }

        if let Some(entry) = self.store.entry(key) {
            let now = now_ms();
            if entry.is_fresh(now) {
                return Ok(entry.data);
            }
            if entry.is_stale(now) {
                debug!(key, "serving stale value, revalidating in background");
                // The spawned driver keeps the shared future running.
                let _ = self.register_fetch(key, config, fetch);
                return Ok(entry.data);
            }
            // Aged past the stale window: treated like a miss below.
        }

        let shared = self.register_fetch(key, config, fetch);
        Self::wait(shared, cancel).await
    }

    pub fn invalidate(&self, key: &str) {
        self.store.invalidate(key);
    }

    pub fn invalidate_pattern(&self, pattern: &Regex) {
        self.store.invalidate_pattern(pattern);
    }

    /// Drops both cache tiers and all in-flight bookkeeping. Used to force
    /// a full resynchronization when the effective tenant identity changes.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.pending.clear();
        self.store.clear();
    }

    /// Registers `fetch` as the single in-flight request for `key`, or
    /// returns the one already registered. The returned future caches its
    /// result and clears the in-flight marker on completion, success or
    /// failure, and is driven by a spawned task so it completes even if
    /// every caller stops waiting.
    fn register_fetch<F, Fut>(&self, key: &str, config: CacheConfig, fetch: F) -> SharedFetch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut created = false;
        let shared = match self.pending.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let store = Arc::clone(&self.store);
                let pending = Arc::clone(&self.pending);
                let epoch = Arc::clone(&self.epoch);
                let issued_epoch = epoch.load(Ordering::SeqCst);
                let key_owned = key.to_string();
                let fut = fetch();

                let shared: SharedFetch = async move {
                    let result = fut.await;
                    if epoch.load(Ordering::SeqCst) != issued_epoch {
                        debug!(key = %key_owned, "discarding response issued before clear");
                        return result;
                    }
                    match &result {
                        Ok(value) => store.set(&key_owned, value.clone(), &config),
                        Err(e) => debug!(key = %key_owned, "fetch failed: {e}"),
                    }
                    // Always runs, so a rejection also releases the key.
                    pending.remove(&key_owned);
                    result
                }
                .boxed()
                .shared();

                slot.insert(shared.clone());
                created = true;
                shared
            }
        };

        if created {
            tokio::spawn(shared.clone().map(|_| ()));
        }
        shared
    }

    async fn wait(shared: SharedFetch, cancel: Option<CancellationToken>) -> Result<Value> {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = shared => result,
            },
            None => shared.await,
        }
    }
}
