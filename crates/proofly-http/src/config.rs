//! HTTP adapter configuration.

use proofly_core::defaults;

/// Configuration for [`ProoflyHttpClient`](crate::ProoflyHttpClient).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Service base URL, including the `/api` prefix.
    pub base_url: String,
    /// Sent as `X-API-Key` when set.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            api_key: None,
            timeout_seconds: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl HttpConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PROOFLY_BASE_URL` | hosted service |
    /// | `PROOFLY_API_KEY` (fallback `X_API_KEY`) | none |
    /// | `PROOFLY_TIMEOUT_SECS` | `60` |
    pub fn from_env() -> Self {
        let base_url = std::env::var("PROOFLY_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::BASE_URL.to_string());
        let api_key = std::env::var("PROOFLY_API_KEY")
            .or_else(|_| std::env::var("X_API_KEY"))
            .ok()
            .filter(|v| !v.trim().is_empty());
        let timeout_seconds = std::env::var("PROOFLY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::HTTP_TIMEOUT_SECS);

        Self {
            base_url,
            api_key,
            timeout_seconds,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
