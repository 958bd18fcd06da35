//! Stream configuration
//!
//! Thresholds differ per venue (Binance pings every 20s and drops clients
//! after a minute of silence, other venues expect client-side heartbeats),
//! so every keepalive and retry interval is configuration.

use crate::errors::{Result, StreamError};
use std::time::Duration;

/// Environment variable prefix used by [`StreamConfig::from_env`]
pub const ENV_PREFIX: &str = "SRIQUANT_WS_";

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`; 0 disables it
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(StreamError::ConfigurationError(
                "backoff initial delay must be positive".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(StreamError::ConfigurationError(format!(
                "backoff max delay {:?} is below initial delay {:?}",
                self.max_delay, self.initial_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(StreamError::ConfigurationError(format!(
                "backoff jitter {} outside [0, 1]",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Liveness configuration for one session
#[derive(Debug, Clone, PartialEq)]
pub struct KeepaliveConfig {
    /// Silence after which the connection is treated as dead
    pub idle_timeout: Duration,
    /// Interval for our own pings; `None` only answers the remote's
    pub ping_interval: Option<Duration>,
    /// Bound on every control write (pong, ping, close)
    pub write_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            ping_interval: None,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl KeepaliveConfig {
    /// How often the idle watcher samples the activity clock
    pub fn idle_check_interval(&self) -> Duration {
        (self.idle_timeout / 10).clamp(Duration::from_millis(5), Duration::from_secs(5))
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(StreamError::ConfigurationError(
                "idle timeout must be positive".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(StreamError::ConfigurationError(
                "write timeout must be positive".to_string(),
            ));
        }
        if self.ping_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(StreamError::ConfigurationError(
                "ping interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration of a supervised stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    /// Optional `http://host:port` CONNECT proxy
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    pub keepalive: KeepaliveConfig,
    /// Consecutive failed connection attempts before giving up; 0 = unlimited
    pub max_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            keepalive: KeepaliveConfig::default(),
            max_attempts: 0,
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.backoff.initial_delay = initial_delay;
        self.backoff.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive.idle_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.keepalive.ping_interval = Some(interval);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive.write_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate the supervisor-level settings
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        self.keepalive.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(StreamError::ConfigurationError(
                "connect timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `SRIQUANT_WS_*` environment variables.
    ///
    /// `SRIQUANT_WS_URL` is required; `PROXY`, `CONNECT_TIMEOUT_MS`,
    /// `BACKOFF_INITIAL_MS`, `BACKOFF_MAX_MS`, `BACKOFF_JITTER`,
    /// `IDLE_TIMEOUT_SECS`, `PING_INTERVAL_SECS`, `WRITE_TIMEOUT_SECS` and
    /// `MAX_ATTEMPTS` override the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup using the `from_env` keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let url = get("URL").ok_or_else(|| {
            StreamError::ConfigurationError(format!("{ENV_PREFIX}URL is not set"))
        })?;
        let mut config = Self::new(url);

        config.proxy = get("PROXY").filter(|proxy| !proxy.is_empty());
        if let Some(ms) = parse_var::<u64>("CONNECT_TIMEOUT_MS", get("CONNECT_TIMEOUT_MS"))? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("BACKOFF_INITIAL_MS", get("BACKOFF_INITIAL_MS"))? {
            config.backoff.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("BACKOFF_MAX_MS", get("BACKOFF_MAX_MS"))? {
            config.backoff.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse_var::<f64>("BACKOFF_JITTER", get("BACKOFF_JITTER"))? {
            config.backoff.jitter = jitter;
        }
        if let Some(secs) = parse_var::<u64>("IDLE_TIMEOUT_SECS", get("IDLE_TIMEOUT_SECS"))? {
            config.keepalive.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("PING_INTERVAL_SECS", get("PING_INTERVAL_SECS"))? {
            config.keepalive.ping_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64>("WRITE_TIMEOUT_SECS", get("WRITE_TIMEOUT_SECS"))? {
            config.keepalive.write_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>("MAX_ATTEMPTS", get("MAX_ATTEMPTS"))? {
            config.max_attempts = max;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            StreamError::ConfigurationError(format!("{ENV_PREFIX}{name}: invalid value {raw:?}"))
        }),
    }
}
