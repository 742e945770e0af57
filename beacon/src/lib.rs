//! Client-side data synchronization layer for the Beacon visibility
//! dashboards: a tiered cache with time-based freshness, request
//! deduplication with stale-while-revalidate, and a per-resource polling
//! multiplexer for long-running onboarding jobs.

#![deny(clippy::all)]

pub mod domain;
pub mod keys;
pub mod orchestrator;
pub mod ports;
pub mod progress;
pub mod store;
pub mod transport;

pub use domain::{CacheConfig, CacheEntry};
pub use keys::KeyPolicy;
pub use orchestrator::RequestOrchestrator;
pub use ports::{Method, RequestConfig, RequestOptions, Transport};
pub use progress::{PollConfig, ProgressMonitor, ProgressSnapshot, ProgressSubscription};
pub use store::TieredStore;
pub use transport::HttpTransport;
