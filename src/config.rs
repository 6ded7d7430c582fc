//! Validated configuration for limiters and connection pools.
//!
//! Everything here is checked once at construction time; nothing in this module can fail while
//! a request is being admitted.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default store port when an address is built from a bare host.
pub const DEFAULT_STORE_PORT: u16 = 6379;

/// Length of the coarse window. Also the TTL given to a freshly opened counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WindowUnit {
    Second,
    Minute,
    Hour,
}

impl WindowUnit {
    /// TTL applied to a counter when its window opens.
    pub fn ttl(self) -> Duration {
        match self {
            WindowUnit::Second => Duration::from_secs(1),
            WindowUnit::Minute => Duration::from_secs(60),
            WindowUnit::Hour => Duration::from_secs(3_600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowUnit::Second => "second",
            WindowUnit::Minute => "minute",
            WindowUnit::Hour => "hour",
        }
    }
}

impl fmt::Display for WindowUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(WindowUnit::Second),
            "minute" => Ok(WindowUnit::Minute),
            "hour" => Ok(WindowUnit::Hour),
            _ => Err(ConfigError::InvalidWindowUnit(s.to_string())),
        }
    }
}

/// Per-limiter admission limits.
///
/// Deserializing goes through [`RateLimitConfig::new`], so invalid limits are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawRateLimitConfig"))]
pub struct RateLimitConfig {
    limit: u64,
    burst_limit: u64,
    window: WindowUnit,
}

impl RateLimitConfig {
    /// Both limits must be positive.
    pub fn new(limit: u64, burst_limit: u64, window: WindowUnit) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidLimit(limit));
        }
        if burst_limit == 0 {
            return Err(ConfigError::InvalidBurstLimit(burst_limit));
        }
        Ok(Self { limit, burst_limit, window })
    }

    /// Maximum admissions per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Maximum admissions per wall-clock second.
    pub fn burst_limit(&self) -> u64 {
        self.burst_limit
    }

    pub fn window(&self) -> WindowUnit {
        self.window
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawRateLimitConfig {
    limit: u64,
    burst_limit: u64,
    window: WindowUnit,
}

#[cfg(feature = "serde")]
impl TryFrom<RawRateLimitConfig> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRateLimitConfig) -> Result<Self, ConfigError> {
        Self::new(raw.limit, raw.burst_limit, raw.window)
    }
}

/// Where and how to reach the store.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    /// `host:port`.
    pub address: String,
    pub password: Option<String>,
    /// Logical database selected after connecting.
    pub database: u32,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::from_host("127.0.0.1", None)
    }
}

impl Endpoint {
    /// Build an endpoint from a host and optional port (default 6379).
    pub fn from_host(host: &str, port: Option<u16>) -> Self {
        Self {
            address: format!("{}:{}", host, port.unwrap_or(DEFAULT_STORE_PORT)),
            password: None,
            database: 0,
        }
    }
}

/// Connection pool limits.
///
/// Deserializing goes through [`PoolConfigBuilder::build`]; absent fields take the builder's
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "PoolConfigBuilder"))]
pub struct PoolConfig {
    endpoint: Endpoint,
    max_idle: usize,
    max_active: usize,
    idle_timeout: Duration,
    acquire_timeout: Option<Duration>,
    test_on_borrow: bool,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Most connections kept idle for reuse.
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    /// Most connections checked out at once.
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Idle connections older than this are closed instead of reused.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// `None` fails fast when the pool is exhausted.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    /// Ping idle connections before handing them out.
    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfigBuilder {
    endpoint: Endpoint,
    max_idle: usize,
    max_active: usize,
    idle_timeout: Duration,
    acquire_timeout: Option<Duration>,
    test_on_borrow: bool,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::default(),
            max_idle: 16,
            max_active: 64,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: None,
            test_on_borrow: true,
        }
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Shorthand for `host:port` without credentials.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.endpoint.address = address.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.endpoint.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: u32) -> Self {
        self.endpoint.database = database;
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Wait up to `timeout` for a connection instead of failing fast.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        if self.endpoint.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidIdleTimeout);
        }
        if self.max_active == 0 {
            return Err(ConfigError::InvalidMaxActive);
        }
        if self.max_idle > self.max_active {
            return Err(ConfigError::MaxIdleExceedsActive {
                max_idle: self.max_idle,
                max_active: self.max_active,
            });
        }
        Ok(PoolConfig {
            endpoint: self.endpoint,
            max_idle: self.max_idle,
            max_active: self.max_active,
            idle_timeout: self.idle_timeout,
            acquire_timeout: self.acquire_timeout,
            test_on_borrow: self.test_on_borrow,
        })
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<PoolConfigBuilder> for PoolConfig {
    type Error = ConfigError;

    fn try_from(builder: PoolConfigBuilder) -> Result<Self, ConfigError> {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_units_parse_and_map_to_ttls() {
        assert_eq!("second".parse::<WindowUnit>().unwrap().ttl(), Duration::from_secs(1));
        assert_eq!("Minute".parse::<WindowUnit>().unwrap().ttl(), Duration::from_secs(60));
        assert_eq!(" hour ".parse::<WindowUnit>().unwrap().ttl(), Duration::from_secs(3_600));
        assert_eq!(
            "day".parse::<WindowUnit>(),
            Err(ConfigError::InvalidWindowUnit("day".into()))
        );
    }

    #[test]
    fn limits_must_be_positive() {
        assert_eq!(
            RateLimitConfig::new(0, 5, WindowUnit::Minute),
            Err(ConfigError::InvalidLimit(0))
        );
        assert_eq!(
            RateLimitConfig::new(5, 0, WindowUnit::Minute),
            Err(ConfigError::InvalidBurstLimit(0))
        );
        let cfg = RateLimitConfig::new(180, 20, WindowUnit::Minute).unwrap();
        assert_eq!((cfg.limit(), cfg.burst_limit(), cfg.window()), (180, 20, WindowUnit::Minute));
    }

    #[test]
    fn endpoint_defaults_to_standard_port() {
        assert_eq!(Endpoint::from_host("10.0.0.5", None).address, "10.0.0.5:6379");
        assert_eq!(Endpoint::from_host("cache", Some(7000)).address, "cache:7000");
    }

    #[test]
    fn endpoint_debug_redacts_password() {
        let cfg = PoolConfig::builder().password("hunter2").build().unwrap();
        let rendered = format!("{:?}", cfg.endpoint());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn pool_config_validation() {
        assert_eq!(
            PoolConfig::builder().idle_timeout(Duration::ZERO).build(),
            Err(ConfigError::InvalidIdleTimeout)
        );
        assert_eq!(PoolConfig::builder().max_active(0).build(), Err(ConfigError::InvalidMaxActive));
        assert_eq!(
            PoolConfig::builder().max_active(2).max_idle(3).build(),
            Err(ConfigError::MaxIdleExceedsActive { max_idle: 3, max_active: 2 })
        );
        assert_eq!(PoolConfig::builder().address("  ").build(), Err(ConfigError::EmptyAddress));
        let cfg = PoolConfig::builder().max_idle(100).max_active(2500).build().unwrap();
        assert_eq!(cfg.max_active(), 2500);
        assert_eq!(cfg.acquire_timeout(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialized_limits_are_validated() {
        let err = serde_json::from_str::<RateLimitConfig>(
            r#"{"limit":0,"burst_limit":0,"window":"second"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains(&ConfigError::InvalidLimit(0).to_string()));

        let err = serde_json::from_str::<RateLimitConfig>(
            r#"{"limit":5,"burst_limit":0,"window":"minute"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains(&ConfigError::InvalidBurstLimit(0).to_string()));

        let cfg: RateLimitConfig =
            serde_json::from_str(r#"{"limit":3,"burst_limit":10,"window":"second"}"#).unwrap();
        assert_eq!(cfg, RateLimitConfig::new(3, 10, WindowUnit::Second).unwrap());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialized_pool_config_is_validated() {
        let err = serde_json::from_str::<PoolConfig>(r#"{"max_active":0}"#).unwrap_err();
        assert!(err.to_string().contains(&ConfigError::InvalidMaxActive.to_string()));

        let err = serde_json::from_str::<PoolConfig>(r#"{"idle_timeout":{"secs":0,"nanos":0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains(&ConfigError::InvalidIdleTimeout.to_string()));

        let cfg: PoolConfig = serde_json::from_str(r#"{"max_idle":2,"max_active":4}"#).unwrap();
        assert_eq!(cfg, PoolConfig::builder().max_idle(2).max_active(4).build().unwrap());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serialized_configs_load_back() {
        let limits = RateLimitConfig::new(180, 20, WindowUnit::Hour).unwrap();
        let json = serde_json::to_string(&limits).unwrap();
        assert_eq!(serde_json::from_str::<RateLimitConfig>(&json).unwrap(), limits);

        let pool = PoolConfig::builder().password("s3cret").database(2).build().unwrap();
        let json = serde_json::to_string(&pool).unwrap();
        assert_eq!(serde_json::from_str::<PoolConfig>(&json).unwrap(), pool);
    }
}
