//! Cache configuration.

use crate::error::ConfigurationError;
use mdcache_book::StoreConfig;
use mdcache_transport::{DEFAULT_MAX_FRAME_SIZE, ReconnectConfig, SessionConfig, TransportConfig};
use std::fmt;
use std::time::Duration;

/// Default feed endpoint.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:9001";

/// Configuration for [`MarketDataCache`](crate::MarketDataCache).
#[derive(Clone)]
pub struct CacheConfig {
    endpoint: String,
    secret: String,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    reconnect: ReconnectConfig,
    max_frame_size: usize,
    tcp_nodelay: bool,
    recent_events_capacity: usize,
    pending_limit: usize,
    book_history_capacity: usize,
    report_interval: Option<Duration>,
}

impl CacheConfig {
    /// Creates a configuration with defaults for everything but the credentials.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret: secret.into(),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            reconnect: ReconnectConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tcp_nodelay: true,
            recent_events_capacity: 10_000,
            pending_limit: 1024,
            book_history_capacity: 1000,
            report_interval: Some(Duration::from_secs(30)),
        }
    }

    /// Reads the configuration from `MDCACHE_*` environment variables.
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] if a variable cannot be parsed or the
    /// result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    ///
    /// # Errors
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let endpoint = lookup("MDCACHE_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let secret = lookup("MDCACHE_SECRET").unwrap_or_default();
        let mut cfg = Self::new(endpoint, secret);

        if let Some(ms) = parse_var::<u64>(&lookup, "MDCACHE_CONNECT_TIMEOUT_MS")? {
            cfg.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MDCACHE_HEARTBEAT_TIMEOUT_MS")? {
            cfg.heartbeat_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "MDCACHE_RECENT_EVENTS")? {
            cfg.recent_events_capacity = capacity;
        }
        if let Some(depth) = parse_var::<usize>(&lookup, "MDCACHE_BOOK_HISTORY")? {
            cfg.book_history_capacity = depth;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MDCACHE_REPORT_INTERVAL_SECS")? {
            // Zero turns the reporter off.
            cfg.report_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Sets the connection and handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the keepalive ping interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets how long the feed may stay silent before it is declared stalled.
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Sets the capacity of the recent-events buffer.
    #[must_use]
    pub fn recent_events_capacity(mut self, capacity: usize) -> Self {
        self.recent_events_capacity = capacity;
        self
    }

    /// Sets how many deltas may queue per instrument while awaiting a snapshot.
    #[must_use]
    pub fn pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    /// Sets how many past book views are kept per instrument. Zero keeps none.
    #[must_use]
    pub fn book_history_capacity(mut self, capacity: usize) -> Self {
        self.book_history_capacity = capacity;
        self
    }

    /// Sets the summary interval; `None` disables the reporter.
    #[must_use]
    pub fn report_interval(mut self, interval: Option<Duration>) -> Self {
        self.report_interval = interval;
        self
    }

    /// Returns the feed endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the team secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns the connection and handshake timeout.
    #[must_use]
    pub fn connect_timeout_value(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns whether TCP_NODELAY is set on feed connections.
    #[must_use]
    pub fn tcp_nodelay_enabled(&self) -> bool {
        self.tcp_nodelay
    }

    /// Returns the reporter interval.
    #[must_use]
    pub fn report_interval_value(&self) -> Option<Duration> {
        self.report_interval
    }

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigurationError::MissingSecret);
        }
        validate_endpoint(&self.endpoint)?;

        if self.connect_timeout.is_zero() {
            return Err(ConfigurationError::invalid("connect_timeout", "must be non-zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigurationError::invalid("heartbeat_interval", "must be non-zero"));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigurationError::invalid(
                "heartbeat_timeout",
                format!(
                    "{:?} must exceed heartbeat interval {:?}",
                    self.heartbeat_timeout, self.heartbeat_interval
                ),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigurationError::invalid("max_frame_size", "must be non-zero"));
        }
        if self.recent_events_capacity == 0 {
            return Err(ConfigurationError::invalid(
                "recent_events_capacity",
                "must be non-zero",
            ));
        }
        if self.pending_limit == 0 {
            return Err(ConfigurationError::invalid("pending_limit", "must be non-zero"));
        }
        if !(1.0..=10.0).contains(&self.reconnect.backoff_multiplier) {
            return Err(ConfigurationError::invalid(
                "backoff_multiplier",
                "must be between 1.0 and 10.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigurationError::invalid("jitter", "must be between 0.0 and 1.0"));
        }
        if matches!(self.report_interval, Some(interval) if interval.is_zero()) {
            return Err(ConfigurationError::invalid("report_interval", "must be non-zero"));
        }
        Ok(())
    }

    /// Returns the transport settings.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            session: SessionConfig {
                heartbeat_interval: self.heartbeat_interval,
                heartbeat_timeout: self.heartbeat_timeout,
                max_frame_size: self.max_frame_size,
                request_snapshot: true,
            },
            reconnect: self.reconnect.clone(),
        }
    }

    /// Returns the store settings.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            recent_events_capacity: self.recent_events_capacity,
            pending_limit: self.pending_limit,
            book_history_capacity: self.book_history_capacity,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, "")
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("endpoint", &self.endpoint)
            .field("secret", &redact(&self.secret))
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("reconnect", &self.reconnect)
            .field("max_frame_size", &self.max_frame_size)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("recent_events_capacity", &self.recent_events_capacity)
            .field("pending_limit", &self.pending_limit)
            .field("book_history_capacity", &self.book_history_capacity)
            .field("report_interval", &self.report_interval)
            .finish()
    }
}

fn redact(secret: &str) -> String {
    match secret.chars().count() {
        0 => String::new(),
        n if n <= 4 => "***".to_string(),
        _ => {
            let head: String = secret.chars().take(2).collect();
            format!("{head}***")
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigurationError>
where
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigurationError::invalid(key, format!("'{raw}': {e}"))),
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be 1-65535")),
        Ok(_) => Ok(()),
    }
}
