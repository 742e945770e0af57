use async_trait::async_trait;
use serde_json::Value;
use shared::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Ports are the pluggable extension points for the sync layer. The HTTP
// transport is deliberately a port: the cache, orchestrator, and poller
// never depend on a concrete client.

/// Port for issuing API requests. Implementations must reject on network
/// failure, non-2xx status, or timeout, and must honor the cancellation
/// token carried in [`RequestOptions`] by resolving to
/// [`shared::Error::Cancelled`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
        config: RequestConfig,
    ) -> Result<Value>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Cooperative cancellation for this request
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RequestConfig {
    pub requires_auth: bool,
    pub timeout: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            requires_auth: true,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}
