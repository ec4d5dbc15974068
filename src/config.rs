/// Configuration for the Concrnt client
use std::env;
use std::time::Duration;

/// Client configuration
///
/// `default_cache_ttl: None` means cached entries never go stale on their
/// own; individual reads may pass a tighter TTL.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default home domain used when a request names no host
    pub host: String,

    /// Per-request timeout (default: 5 seconds)
    pub timeout: Duration,

    /// Default freshness window for positive cache entries (default: none)
    pub default_cache_ttl: Option<Duration>,

    /// Freshness window for negative (404) cache entries (default: 300s)
    pub negative_cache_ttl: Duration,

    /// User-Agent header for HTTP requests
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            timeout: Duration::from_millis(5000),
            default_cache_ttl: None,
            negative_cache_ttl: Duration::from_secs(300),
            user_agent: format!("concrnt-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given home domain
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("CONCRNT_HOST").unwrap_or(defaults.host),
            timeout: env::var("CONCRNT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            default_cache_ttl: env::var("CONCRNT_CACHE_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
            negative_cache_ttl: env::var("CONCRNT_NEGATIVE_CACHE_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.negative_cache_ttl),
            user_agent: env::var("CONCRNT_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(300));
        assert!(config.default_cache_ttl.is_none());
        assert!(config.user_agent.starts_with("concrnt-client/"));
    }

    #[test]
    fn test_config_new() {
        let config = ClientConfig::new("ariake.concrnt.net");
        assert_eq!(config.host, "ariake.concrnt.net");
        assert_eq!(config.timeout, Duration::from_millis(5000));
    }
}
