//! Singleton-per-resource progress polling.
//!
//! One [`ProgressMonitor`] owns at most one tracker per brand id. The first
//! subscriber creates the tracker and its poll loop; further subscribers
//! share it; the last one to drop destroys it. Snapshots fan out over a
//! broadcast channel so a slow or dropped observer can never stall the loop
//! or the other observers. Progress is never cached: a dashboard must not
//! see a stale completion state.

pub mod completion;
pub mod payload;

use self::payload::{ProgressEnvelope, ProgressPayload};
use crate::ports::{RequestConfig, RequestOptions, Transport};
use serde::Serialize;
use shared::config::Config;
use shared::{now_ms, Error};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed poll cadence. The initial poll is delayed a beat so a burst of
/// subscriptions in one UI tick produces a single request, not a herd.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(250);

const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl PollConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            initial_delay: Duration::from_millis(config.initial_poll_delay_ms),
        }
    }
}

/// The authoritative view of one onboarding job, delivered to every
/// subscriber on each poll cycle. `data` only ever moves forward: a failed
/// poll keeps the previous payload so the UI renders last-known-good state
/// through transient outages.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProgressSnapshot {
    pub data: Option<ProgressPayload>,
    pub last_updated_at: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub is_complete: bool,
    pub is_ready_for_preview: bool,
}

struct TrackerShared {
    brand_id: String,
    snapshot: RwLock<ProgressSnapshot>,
    tx: broadcast::Sender<ProgressSnapshot>,
    /// Tracker-lifetime token; firing it is the one authoritative teardown.
    cancel: CancellationToken,
    /// Identity of the latest issued request. A response is applied only if
    /// the generation it was issued under is still current.
    generation: AtomicU64,
    /// Token of the request currently in flight, if any.
    active_request: Mutex<Option<CancellationToken>>,
}

impl TrackerShared {
    fn new(brand_id: &str) -> Self {
        let (tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            brand_id: brand_id.to_string(),
            snapshot: RwLock::new(ProgressSnapshot::default()),
            tx,
            cancel: CancellationToken::new(),
            generation: AtomicU64::new(0),
            active_request: Mutex::new(None),
        }
    }
}

struct TrackerEntry {
    shared: Arc<TrackerShared>,
    subscribers: usize,
}

struct MonitorInner {
    transport: Arc<dyn Transport>,
    config: PollConfig,
    trackers: Mutex<HashMap<String, TrackerEntry>>,
}

/// Registry of per-brand progress trackers. Construct one per application,
/// inject it where observers live, and `dispose` it on shutdown.
#[derive(Clone)]
pub struct ProgressMonitor {
    inner: Arc<MonitorInner>,
}

impl ProgressMonitor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, PollConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: PollConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                transport,
                config,
                trackers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes to the tracker for `brand_id`, creating it (and its poll
    /// loop) on first subscription. Must be called from within the runtime.
    pub fn subscribe(&self, brand_id: &str) -> ProgressSubscription {
        let mut trackers = self
            .inner
            .trackers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = trackers
            .entry(brand_id.to_string())
            .or_insert_with(|| {
                debug!(brand_id, "creating progress tracker");
                let shared = Arc::new(TrackerShared::new(brand_id));
                tokio::spawn(poll_loop(
                    Arc::clone(&self.inner.transport),
                    self.inner.config,
                    Arc::clone(&shared),
                ));
                TrackerEntry {
                    shared,
                    subscribers: 0,
                }
            });
        entry.subscribers += 1;

        ProgressSubscription {
            rx: entry.shared.tx.subscribe(),
            shared: Arc::clone(&entry.shared),
            monitor: Arc::clone(&self.inner),
        }
    }

    pub fn tracker_count(&self) -> usize {
        self.inner
            .trackers
            .lock()
            .map(|trackers| trackers.len())
            .unwrap_or(0)
    }

    /// Tears down every tracker. Live subscriptions keep their last
    /// snapshot but receive no further updates.
    pub fn dispose(&self) {
        let Ok(mut trackers) = self.inner.trackers.lock() else {
            return;
        };
        for entry in trackers.values() {
            entry.shared.cancel.cancel();
        }
        trackers.clear();
    }
}

/// Handle for one observer. Dropping it unsubscribes; the last drop stops
/// the poll loop, aborts any in-flight request, and removes the tracker, so
/// no timer can outlive its observers.
pub struct ProgressSubscription {
    rx: broadcast::Receiver<ProgressSnapshot>,
    shared: Arc<TrackerShared>,
    monitor: Arc<MonitorInner>,
}

impl ProgressSubscription {
    pub fn resource_id(&self) -> &str {
        &self.shared.brand_id
    }

    /// The tracker's current snapshot, without waiting for the next cycle.
    pub fn latest(&self) -> ProgressSnapshot {
        self.shared
            .snapshot
            .read()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }

    /// Waits for the next snapshot. Returns `None` once the tracker is gone
    /// and no further snapshots can arrive.
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        brand_id = %self.shared.brand_id,
                        skipped, "subscriber lagged behind snapshot fan-out"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        let Ok(mut trackers) = self.monitor.trackers.lock() else {
            return;
        };
        let Some(entry) = trackers.get_mut(&self.shared.brand_id) else {
            // Already disposed, or replaced by a newer tracker.
            return;
        };
        if !Arc::ptr_eq(&entry.shared, &self.shared) {
            return;
        }
        entry.subscribers -= 1;
        if entry.subscribers == 0 {
            debug!(brand_id = %self.shared.brand_id, "destroying progress tracker");
            entry.shared.cancel.cancel();
            trackers.remove(&self.shared.brand_id);
        }
    }
}

async fn poll_loop(transport: Arc<dyn Transport>, config: PollConfig, shared: Arc<TrackerShared>) {
    tokio::select! {
        _ = shared.cancel.cancelled() => return,
        _ = tokio::time::sleep(config.initial_delay) => {}
    }

    loop {
        poll_once(transport.as_ref(), &shared).await;
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}

async fn poll_once(transport: &dyn Transport, shared: &TrackerShared) {
    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let request_token = shared.cancel.child_token();

    // A previous request for this resource must never survive into the new
    // cycle. The loop polls sequentially, so this is normally a no-op.
    if let Ok(mut active) = shared.active_request.lock() {
        if let Some(previous) = active.replace(request_token.clone()) {
            previous.cancel();
        }
    }

    let endpoint = format!("/brands/{}/onboarding-progress", shared.brand_id);
    let options = RequestOptions::get().with_cancel(request_token.clone());
    let result = transport
        .request(&endpoint, options, RequestConfig::default())
        .await;

    if let Ok(mut active) = shared.active_request.lock() {
        *active = None;
    }

    // A response belonging to a superseded or torn-down request must never
    // touch the snapshot, whatever it carries.
    if shared.cancel.is_cancelled() || shared.generation.load(Ordering::SeqCst) != generation {
        debug!(brand_id = %shared.brand_id, "discarding superseded poll response");
        return;
    }

    match result {
        Ok(value) => match serde_json::from_value::<ProgressEnvelope>(value) {
            Ok(envelope) => {
                if !envelope.success {
                    apply_failure(shared, envelope.failure_message());
                } else if let Some(data) = envelope.data {
                    apply_success(shared, data);
                } else {
                    apply_failure(shared, "progress response missing data".to_string());
                }
            }
            Err(e) => apply_failure(shared, format!("malformed progress response: {e}")),
        },
        Err(Error::Cancelled) if request_token.is_cancelled() => {
            // Our own deliberate abort: expected, silent, no snapshot.
            debug!(brand_id = %shared.brand_id, "poll aborted by tracker teardown");
        }
        Err(e) => apply_failure(shared, e.to_string()),
    }
}

fn apply_success(shared: &TrackerShared, data: ProgressPayload) {
    let snapshot = {
        let Ok(mut snapshot) = shared.snapshot.write() else {
            return;
        };
        snapshot.is_complete = completion::is_complete(&data);
        snapshot.is_ready_for_preview = completion::is_ready_for_preview(&data);
        snapshot.data = Some(data);
        snapshot.last_updated_at = Some(now_ms());
        snapshot.last_error = None;
        snapshot.consecutive_failures = 0;
        snapshot.clone()
    };
    fan_out(shared, snapshot);
}

fn apply_failure(shared: &TrackerShared, message: String) {
    warn!(brand_id = %shared.brand_id, "progress poll failed: {message}");
    let snapshot = {
        let Ok(mut guard) = shared.snapshot.write() else {
            return;
        };
        let snapshot = &mut *guard;
        // Completion is recomputed from the retained data, never blanked by
        // a transient error.
        if let Some(data) = &snapshot.data {
            snapshot.is_complete = completion::is_complete(data);
            snapshot.is_ready_for_preview = completion::is_ready_for_preview(data);
        }
        snapshot.last_error = Some(message);
        snapshot.consecutive_failures += 1;
        snapshot.clone()
    };
    fan_out(shared, snapshot);
}

fn fan_out(shared: &TrackerShared, snapshot: ProgressSnapshot) {
    match shared.tx.send(snapshot) {
        Ok(delivered) => {
            debug!(brand_id = %shared.brand_id, subscribers = delivered, "delivered snapshot")
        }
        Err(_) => debug!(brand_id = %shared.brand_id, "no live receivers for snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Method;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use shared::Result;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    fn fast_config() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            initial_delay: Duration::from_millis(1),
        }
    }

    fn staged_envelope(completed: u64) -> Value {
        let status = if completed >= 10 { "completed" } else { "active" };
        json!({
            "success": true,
            "data": {
                "stages": {
                    "collection": {"total": 10, "completed": completed, "status": status},
                    "scoring": {"status": "pending"},
                    "recommendations": {"status": "pending"}
                }
            }
        })
    }

    /// Plays back a scripted sequence of responses, then repeats the last
    /// canned answer forever.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(
            &self,
            endpoint: &str,
            options: RequestOptions,
            _config: RequestConfig,
        ) -> Result<Value> {
            assert!(endpoint.ends_with("/onboarding-progress"));
            assert_eq!(options.method, Method::Get);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(staged_envelope(1)))
        }
    }

    /// Parks every request until its cancellation token fires.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn request(
            &self,
            _endpoint: &str,
            options: RequestOptions,
            _config: RequestConfig,
        ) -> Result<Value> {
            let token = options.cancel.expect("poller always passes a token");
            token.cancelled().await;
            Err(Error::Cancelled)
        }
    }

    async fn next_snapshot(subscription: &mut ProgressSubscription) -> ProgressSnapshot {
        timeout(Duration::from_secs(1), subscription.next())
            .await
            .expect("snapshot should arrive")
            .expect("tracker should be alive")
    }

    #[tokio::test]
    async fn one_tracker_fans_out_to_every_subscriber() {
        let transport = ScriptedTransport::new(vec![Ok(staged_envelope(3))]);
        let monitor = ProgressMonitor::with_config(transport.clone(), fast_config());

        let mut first = monitor.subscribe("b1");
        let mut second = monitor.subscribe("b1");
        assert_eq!(monitor.tracker_count(), 1, "same id reuses the tracker");

        let snapshot_a = next_snapshot(&mut first).await;
        let snapshot_b = next_snapshot(&mut second).await;
        assert!(snapshot_a.data.is_some());
        assert!(snapshot_b.data.is_some());
        assert_eq!(snapshot_a.consecutive_failures, 0);

        monitor.dispose();
    }

    #[tokio::test]
    async fn last_unsubscribe_destroys_tracker_and_resubscribe_recreates() {
        let transport = ScriptedTransport::new(vec![]);
        let monitor = ProgressMonitor::with_config(transport.clone(), fast_config());

        let first = monitor.subscribe("b1");
        let second = monitor.subscribe("b1");
        drop(first);
        assert_eq!(monitor.tracker_count(), 1, "one subscriber remains");
        drop(second);
        assert_eq!(monitor.tracker_count(), 0, "tracker must not leak");

        let calls_at_teardown = transport.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            transport.calls() <= calls_at_teardown + 1,
            "destroyed tracker must stop polling"
        );

        // A fresh subscription gets a brand-new tracker that polls again.
        let mut revived = monitor.subscribe("b1");
        assert_eq!(monitor.tracker_count(), 1);
        let snapshot = next_snapshot(&mut revived).await;
        assert!(snapshot.data.is_some());
        monitor.dispose();
    }

    #[tokio::test]
    async fn failures_keep_data_and_count_until_next_success() {
        let transport = ScriptedTransport::new(vec![
            Ok(staged_envelope(4)),
            Err(Error::Transport("connection reset".into())),
            Err(Error::Timeout(5_000)),
            Ok(staged_envelope(6)),
        ]);
        let monitor = ProgressMonitor::with_config(transport, fast_config());
        let mut subscription = monitor.subscribe("b1");

        let healthy = next_snapshot(&mut subscription).await;
        assert_eq!(healthy.consecutive_failures, 0);
        let first_data = healthy.data.clone().unwrap();

        let degraded = next_snapshot(&mut subscription).await;
        assert_eq!(degraded.consecutive_failures, 1);
        assert_eq!(degraded.data.as_ref(), Some(&first_data), "data is retained");
        assert!(degraded.last_error.as_deref().unwrap().contains("connection reset"));

        let degraded_again = next_snapshot(&mut subscription).await;
        assert_eq!(degraded_again.consecutive_failures, 2);
        assert_eq!(degraded_again.data.as_ref(), Some(&first_data));

        let recovered = next_snapshot(&mut subscription).await;
        assert_eq!(recovered.consecutive_failures, 0, "success resets to zero");
        assert!(recovered.last_error.is_none());
        assert_ne!(recovered.data.as_ref(), Some(&first_data));

        monitor.dispose();
    }

    #[tokio::test]
    async fn logical_failure_carries_server_message() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "success": false,
            "error": "brand is still provisioning"
        }))]);
        let monitor = ProgressMonitor::with_config(transport, fast_config());
        let mut subscription = monitor.subscribe("b1");

        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot
            .last_error
            .as_deref()
            .unwrap()
            .contains("still provisioning"));
        assert!(snapshot.data.is_none());

        monitor.dispose();
    }

    #[tokio::test]
    async fn http_200_without_data_is_a_failure() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"success": true}))]);
        let monitor = ProgressMonitor::with_config(transport, fast_config());
        let mut subscription = monitor.subscribe("b1");

        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot.last_error.as_deref().unwrap().contains("missing data"));

        monitor.dispose();
    }

    #[tokio::test]
    async fn deliberate_abort_is_silent() {
        let monitor =
            ProgressMonitor::with_config(Arc::new(HangingTransport), fast_config());
        let mut subscription = monitor.subscribe("b1");

        // Let the request get in flight, then tear everything down.
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = subscription.latest();
        assert_eq!(snapshot.consecutive_failures, 0, "abort is not a failure");
        assert!(snapshot.last_error.is_none());
        assert!(
            timeout(Duration::from_millis(50), subscription.next())
                .await
                .is_err(),
            "no snapshot is emitted for an aborted cycle"
        );
    }

    #[tokio::test]
    async fn foreign_cancellation_counts_as_transient_failure() {
        // The transport reports a cancellation the poller never asked for.
        let transport = ScriptedTransport::new(vec![Err(Error::Cancelled)]);
        let monitor = ProgressMonitor::with_config(transport, fast_config());
        let mut subscription = monitor.subscribe("b1");

        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.consecutive_failures, 1);

        monitor.dispose();
    }

    #[tokio::test]
    async fn superseded_response_never_lands() {
        /// Simulates a newer request starting while this response is still
        /// in flight by bumping the tracker's generation before answering.
        struct RacingTransport {
            shared: std::sync::Weak<TrackerShared>,
        }

        #[async_trait]
        impl Transport for RacingTransport {
            async fn request(
                &self,
                _endpoint: &str,
                _options: RequestOptions,
                _config: RequestConfig,
            ) -> Result<Value> {
                if let Some(shared) = self.shared.upgrade() {
                    shared.generation.fetch_add(1, Ordering::SeqCst);
                }
                Ok(staged_envelope(10))
            }
        }

        let shared = Arc::new(TrackerShared::new("b1"));
        let transport = RacingTransport {
            shared: Arc::downgrade(&shared),
        };

        poll_once(&transport, &shared).await;
        let snapshot = shared.snapshot.read().unwrap().clone();
        assert!(snapshot.data.is_none(), "stale response must be discarded");
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn completion_flags_recomputed_from_retained_data_on_failure() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({
                "success": true,
                "data": {
                    "stages": {
                        "collection": {"total": 10, "completed": 10, "status": "completed"},
                        "scoring": {"status": "completed"},
                        "recommendations": {"status": "active"}
                    }
                }
            })),
            Err(Error::Transport("blip".into())),
        ]);
        let monitor = ProgressMonitor::with_config(transport, fast_config());
        let mut subscription = monitor.subscribe("b1");

        let healthy = next_snapshot(&mut subscription).await;
        assert!(healthy.is_ready_for_preview);
        assert!(!healthy.is_complete);

        let degraded = next_snapshot(&mut subscription).await;
        assert!(degraded.is_ready_for_preview, "flags survive the outage");
        assert!(!degraded.is_complete);
        assert_eq!(degraded.consecutive_failures, 1);

        monitor.dispose();
    }
}
