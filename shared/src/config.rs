use tracing::warn;

/// Runtime configuration for the sync layer, resolved from the environment.
pub struct Config {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub initial_poll_delay_ms: u64,
    pub cache_budget_bytes: u64,
    pub cache_dir: String,
}

impl Config {
    const DEFAULT_API_BASE_URL: &'static str = "http://localhost:8080/api";
    const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
    const DEFAULT_INITIAL_POLL_DELAY_MS: u64 = 250;
    const DEFAULT_CACHE_BUDGET_BYTES: u64 = 4 * 1024 * 1024;
    const DEFAULT_CACHE_DIR: &'static str = "./data";

    pub fn from_env() -> Self {
        Self {
            api_base_url: std::env::var("BEACON_API_BASE_URL").unwrap_or_else(|_| {
                warn!(
                    "BEACON_API_BASE_URL not set, using default '{}'",
                    Self::DEFAULT_API_BASE_URL
                );
                Self::DEFAULT_API_BASE_URL.to_string()
            }),
            poll_interval_ms: env_u64("BEACON_POLL_INTERVAL_MS", Self::DEFAULT_POLL_INTERVAL_MS),
            initial_poll_delay_ms: env_u64(
                "BEACON_INITIAL_POLL_DELAY_MS",
                Self::DEFAULT_INITIAL_POLL_DELAY_MS,
            ),
            cache_budget_bytes: env_u64(
                "BEACON_CACHE_BUDGET_BYTES",
                Self::DEFAULT_CACHE_BUDGET_BYTES,
            ),
            cache_dir: std::env::var("BEACON_CACHE_DIR")
                .unwrap_or_else(|_| Self::DEFAULT_CACHE_DIR.to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default)
}
