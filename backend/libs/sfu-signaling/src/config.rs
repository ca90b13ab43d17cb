/// Signaling client configuration
use resilience::RetryConfig;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Clone)]
pub struct SignalingConfig {
    /// Janus HTTP endpoint, e.g. `http://sfu:8088/janus`
    pub janus_url: String,
    /// livestream-service base URL
    pub bridge_api_url: String,
    /// `maxev` for each long-poll request
    pub max_events: u32,
    /// Per-request timeout; must exceed the SFU's long-poll hold time
    pub request_timeout: Duration,
    /// Upper bound for each awaited handshake event
    pub handshake_timeout: Duration,
    /// Backoff curve for long-poll transport failures
    pub poll_backoff: RetryConfig,
    /// Videoroom `secret` for `rtp_forward`, if the room requires one
    pub rtp_forward_secret: Option<String>,
    /// Host the SFU forwards RTP to
    pub forward_host: String,
}

impl std::fmt::Debug for SignalingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingConfig")
            .field("janus_url", &self.janus_url)
            .field("bridge_api_url", &self.bridge_api_url)
            .field("max_events", &self.max_events)
            .field("request_timeout", &self.request_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("poll_backoff", &self.poll_backoff)
            .field(
                "rtp_forward_secret",
                &self.rtp_forward_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("forward_host", &self.forward_host)
            .finish()
    }
}

impl SignalingConfig {
    pub fn new(janus_url: impl Into<String>, bridge_api_url: impl Into<String>) -> Self {
        Self {
            janus_url: janus_url.into(),
            bridge_api_url: bridge_api_url.into(),
            max_events: 5,
            request_timeout: Duration::from_secs(45),
            handshake_timeout: Duration::from_secs(20),
            poll_backoff: RetryConfig {
                max_retries: u32::MAX,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(10),
                backoff_multiplier: 2.0,
                jitter: true,
            },
            rtp_forward_secret: None,
            forward_host: "127.0.0.1".to_string(),
        }
    }

    /// Load from `JANUS_*` / `LIVESTREAM_API_URL` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let janus_url = std::env::var("JANUS_URL").map_err(|_| ConfigError::Missing("JANUS_URL"))?;
        let bridge_api_url = std::env::var("LIVESTREAM_API_URL")
            .map_err(|_| ConfigError::Missing("LIVESTREAM_API_URL"))?;

        let mut config = Self::new(janus_url, bridge_api_url);
        if let Some(max_events) = env_parse("JANUS_POLL_MAXEV") {
            config.max_events = max_events;
        }
        if let Some(secs) = env_parse("JANUS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("JANUS_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse("JANUS_BACKOFF_INITIAL_MS") {
            config.poll_backoff.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("JANUS_BACKOFF_MAX_MS") {
            config.poll_backoff.max_backoff = Duration::from_millis(ms);
        }
        config.rtp_forward_secret = std::env::var("JANUS_RTP_FORWARD_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if let Ok(host) = std::env::var("JANUS_FORWARD_HOST") {
            config.forward_host = host;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for key in [
            "JANUS_URL",
            "LIVESTREAM_API_URL",
            "JANUS_POLL_MAXEV",
            "JANUS_REQUEST_TIMEOUT_SECS",
            "JANUS_HANDSHAKE_TIMEOUT_SECS",
            "JANUS_BACKOFF_INITIAL_MS",
            "JANUS_BACKOFF_MAX_MS",
            "JANUS_RTP_FORWARD_SECRET",
            "JANUS_FORWARD_HOST",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn janus_url_is_required() {
        clear();
        std::env::set_var("LIVESTREAM_API_URL", "http://localhost:8086");
        assert!(matches!(
            SignalingConfig::from_env(),
            Err(ConfigError::Missing("JANUS_URL"))
        ));
        clear();
    }

    #[test]
    #[serial]
    fn overrides_apply_on_top_of_defaults() {
        clear();
        std::env::set_var("JANUS_URL", "http://sfu:8088/janus");
        std::env::set_var("LIVESTREAM_API_URL", "http://localhost:8086");
        std::env::set_var("JANUS_POLL_MAXEV", "10");
        std::env::set_var("JANUS_BACKOFF_MAX_MS", "2500");
        std::env::set_var("JANUS_RTP_FORWARD_SECRET", "adminpwd");

        let config = SignalingConfig::from_env().unwrap();
        assert_eq!(config.max_events, 10);
        assert_eq!(config.poll_backoff.max_backoff, Duration::from_millis(2500));
        assert_eq!(config.poll_backoff.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.rtp_forward_secret.as_deref(), Some("adminpwd"));
        assert_eq!(config.forward_host, "127.0.0.1");
        assert!(!format!("{:?}", config).contains("adminpwd"));
        clear();
    }
}
