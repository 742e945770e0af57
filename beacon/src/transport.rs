use crate::ports::{Method, RequestConfig, RequestOptions, Transport};
use async_trait::async_trait;
use serde_json::Value;
use shared::config::Config;
use shared::{Error, Result};
use std::sync::RwLock;
use tracing::debug;

/// Default [`Transport`] implementation backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_base_url.clone())
    }

    /// Installs (or clears) the bearer token attached to authenticated
    /// requests. Called by the session layer on login/logout and on admin
    /// impersonation switches.
    pub fn set_auth_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.auth_token.write() {
            *slot = token;
        }
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token.read().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
        config: RequestConfig,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(method = ?options.method, %url, "issuing request");

        let mut builder = match options.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };

        if let Some(body) = &options.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.requires_auth {
            if let Some(token) = self.bearer() {
                builder = builder.bearer_auth(token);
            }
        }

        let timeout_ms = config.timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        let send = async move {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(timeout_ms)
                } else {
                    Error::Transport(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Transport(format!("http {status}")));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| Error::Serialization(format!("invalid response body: {e}")))
        };

        match options.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = send => result,
            },
            None => send.await,
        }
    }
}
