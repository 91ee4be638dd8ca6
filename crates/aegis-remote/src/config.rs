//! Backend configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start against a
//! local development backend with zero configuration.

use std::time::Duration;

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the backend.
    /// Env: `AEGIS_BASE_URL`
    /// Default: `http://localhost:54321`
    pub base_url: String,

    /// Public (anonymous) API key sent with every request.
    /// Env: `AEGIS_ANON_KEY`
    /// Default: empty (development only).
    pub anon_key: String,

    /// Per-request timeout.
    /// Env: `AEGIS_HTTP_TIMEOUT_SECS`
    /// Default: 30 seconds.
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("AEGIS_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("AEGIS_ANON_KEY") {
            config.anon_key = key;
        }

        if let Ok(val) = std::env::var("AEGIS_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid AEGIS_HTTP_TIMEOUT_SECS, using default");
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.base_url, "http://localhost:54321");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.anon_key.is_empty());
    }
}
