// shared/src/lib.rs

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A request was cancelled before it completed. Expected and silent;
    /// never surfaced to users as a failure.
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("transport: {0}")]
    Transport(String),
    /// The server answered HTTP 200 but reported a logical failure
    /// (`success: false`). Carries the server-supplied message.
    #[error("server reported failure: {0}")]
    Api(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Current time in milliseconds since UNIX epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub mod config;
