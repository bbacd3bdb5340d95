//! Relay Configuration Settings
//!
//! Configuration types for the ticker relay, loaded from environment
//! variables. Every variable is optional; unparseable values fall back to
//! the default and semantic problems (bad URL scheme, port collision, zero
//! capacities or intervals, unusable backoff parameters) are reported as
//! [`ConfigError`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::infrastructure::upstream::DEFAULT_UPSTREAM_URL;

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket URL of the ticker stream.
    pub url: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
        }
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier (`1.0` = fixed delay).
    pub reconnect_delay_multiplier: f64,
    /// Reconnection delay jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Relay queue and fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the queue between upstream client and coordinator.
    pub queue_capacity: usize,
    /// Outbound buffer per subscriber connection.
    pub subscriber_buffer: usize,
    /// Upper bound on a single delivery.
    pub send_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            subscriber_buffer: 256,
            send_timeout: Duration::from_secs(2),
        }
    }
}

/// Server bind settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind address for both servers.
    pub host: IpAddr,
    /// Relay server port (`/price`, `/ws`).
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            health_port: 8082,
        }
    }
}

impl ServerSettings {
    /// Socket address of the relay server.
    #[must_use]
    pub const fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Socket address of the health server.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.health_port)
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Server bind settings.
    pub server: ServerSettings,
    /// Upstream WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Relay queue and fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Grace period for background tasks on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamSettings::default(),
            server: ServerSettings::default(),
            websocket: WebSocketSettings::default(),
            broadcast: BroadcastSettings::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let upstream = UpstreamSettings {
            url: env
                .string("TICKER_RELAY_UPSTREAM_URL")
                .unwrap_or(defaults.upstream.url),
        };

        let server = ServerSettings {
            host: env.parse("TICKER_RELAY_HOST", defaults.server.host),
            port: env.parse("TICKER_RELAY_PORT", defaults.server.port),
            health_port: env.parse("TICKER_RELAY_HEALTH_PORT", defaults.server.health_port),
        };

        let reconnect_delay_initial = env.duration_millis(
            "TICKER_RELAY_RECONNECT_DELAY_MS",
            defaults.websocket.reconnect_delay_initial,
        );
        // An unset cap never clamps a longer initial delay.
        let reconnect_delay_max = env.duration_millis(
            "TICKER_RELAY_RECONNECT_DELAY_MAX_MS",
            defaults
                .websocket
                .reconnect_delay_max
                .max(reconnect_delay_initial),
        );

        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "TICKER_RELAY_HEARTBEAT_INTERVAL_SECS",
                defaults.websocket.heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "TICKER_RELAY_HEARTBEAT_TIMEOUT_SECS",
                defaults.websocket.heartbeat_timeout,
            ),
            reconnect_delay_initial,
            reconnect_delay_max,
            reconnect_delay_multiplier: env.parse(
                "TICKER_RELAY_RECONNECT_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse(
                "TICKER_RELAY_RECONNECT_JITTER",
                defaults.websocket.reconnect_jitter,
            ),
            max_reconnect_attempts: defaults.websocket.max_reconnect_attempts,
        };

        let broadcast = BroadcastSettings {
            queue_capacity: env.parse(
                "TICKER_RELAY_QUEUE_CAPACITY",
                defaults.broadcast.queue_capacity,
            ),
            subscriber_buffer: env.parse(
                "TICKER_RELAY_SUBSCRIBER_BUFFER",
                defaults.broadcast.subscriber_buffer,
            ),
            send_timeout: env.duration_millis(
                "TICKER_RELAY_SEND_TIMEOUT_MS",
                defaults.broadcast.send_timeout,
            ),
        };

        let config = Self {
            upstream,
            server,
            websocket,
            broadcast,
            shutdown_grace: env
                .duration_secs("TICKER_RELAY_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.upstream.url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyValue("TICKER_RELAY_UPSTREAM_URL".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrlScheme(url.to_string()));
        }

        if self.server.port == self.server.health_port {
            return Err(ConfigError::PortCollision(self.server.port));
        }

        for (key, value) in [
            ("TICKER_RELAY_QUEUE_CAPACITY", self.broadcast.queue_capacity),
            ("TICKER_RELAY_SUBSCRIBER_BUFFER", self.broadcast.subscriber_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(key.to_string()));
            }
        }

        for (key, value) in [
            ("TICKER_RELAY_SEND_TIMEOUT_MS", self.broadcast.send_timeout),
            (
                "TICKER_RELAY_HEARTBEAT_INTERVAL_SECS",
                self.websocket.heartbeat_interval,
            ),
            (
                "TICKER_RELAY_HEARTBEAT_TIMEOUT_SECS",
                self.websocket.heartbeat_timeout,
            ),
            (
                "TICKER_RELAY_RECONNECT_DELAY_MS",
                self.websocket.reconnect_delay_initial,
            ),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroCapacity(key.to_string()));
            }
        }

        self.validate_backoff()
    }

    fn validate_backoff(&self) -> Result<(), ConfigError> {
        let ws = &self.websocket;

        if ws.reconnect_delay_initial > ws.reconnect_delay_max {
            return Err(ConfigError::ReconnectDelayAboveMax {
                initial_ms: millis(ws.reconnect_delay_initial),
                max_ms: millis(ws.reconnect_delay_max),
            });
        }

        let multiplier = ws.reconnect_delay_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_RELAY_RECONNECT_MULTIPLIER",
                reason: "must be a finite number of at least 1.0",
            });
        }

        let jitter = ws.reconnect_jitter;
        if !jitter.is_finite() || !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_RELAY_RECONNECT_JITTER",
                reason: "must be a finite number between 0.0 and 1.0",
            });
        }

        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Upstream URL is not a WebSocket URL.
    #[error("upstream URL must use ws:// or wss://, got: {0}")]
    InvalidUrlScheme(String),
    /// Relay and health server share a port.
    #[error("relay and health server cannot share port {0}")]
    PortCollision(u16),
    /// A capacity, interval or timeout is zero.
    #[error("{0} must be greater than zero")]
    ZeroCapacity(String),
    /// The first reconnect delay exceeds the reconnect delay cap.
    #[error("reconnect delay {initial_ms}ms exceeds reconnect delay cap {max_ms}ms")]
    ReconnectDelayAboveMax {
        /// Configured first delay.
        initial_ms: u64,
        /// Configured cap.
        max_ms: u64,
    },
    /// A numeric setting is outside its usable range.
    #[error("{key} {reason}")]
    InvalidValue {
        /// Offending variable.
        key: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

/// Typed access over a key lookup.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;
    use crate::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_secs(5));
        assert_eq!(config.websocket.reconnect_delay_max, Duration::from_secs(5));
        assert_eq!(config.websocket.max_reconnect_attempts, 0);
        assert_eq!(config.broadcast.queue_capacity, 4096);
        assert_eq!(config.broadcast.subscriber_buffer, 256);
        assert_eq!(config.broadcast.send_timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn overrides_applied() {
        let config = load(&[
            ("TICKER_RELAY_UPSTREAM_URL", "ws://localhost:9001/ws"),
            ("TICKER_RELAY_HOST", "127.0.0.1"),
            ("TICKER_RELAY_PORT", "9000"),
            ("TICKER_RELAY_RECONNECT_DELAY_MS", "250"),
            ("TICKER_RELAY_RECONNECT_MULTIPLIER", "2.0"),
            ("TICKER_RELAY_SUBSCRIBER_BUFFER", "16"),
            ("TICKER_RELAY_SHUTDOWN_GRACE_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.upstream.url, "ws://localhost:9001/ws");
        assert_eq!(config.server.relay_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.health_addr().to_string(), "127.0.0.1:8082");
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_millis(250));
        assert!((config.websocket.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.broadcast.subscriber_buffer, 16);
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = load(&[("TICKER_RELAY_PORT", "not-a-port")]).unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn rejects_http_url() {
        let err = load(&[("TICKER_RELAY_UPSTREAM_URL", "https://example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrlScheme(_)));
    }

    #[test]
    fn rejects_empty_url() {
        let err = load(&[("TICKER_RELAY_UPSTREAM_URL", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn rejects_port_collision() {
        let err = load(&[("TICKER_RELAY_HEALTH_PORT", "8000")]).unwrap_err();
        assert_eq!(err, ConfigError::PortCollision(8000));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = load(&[("TICKER_RELAY_QUEUE_CAPACITY", "0")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroCapacity("TICKER_RELAY_QUEUE_CAPACITY".to_string())
        );
    }

    #[test]
    fn rejects_zero_send_timeout() {
        let err = load(&[("TICKER_RELAY_SEND_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity(_)));
    }

    #[test]
    fn long_initial_delay_is_not_capped_by_default_max() {
        let config = load(&[("TICKER_RELAY_RECONNECT_DELAY_MS", "10000")]).unwrap();
        assert_eq!(config.websocket.reconnect_delay_max, Duration::from_secs(10));

        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_websocket_settings(&config.websocket));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn short_initial_delay_keeps_default_max() {
        let config = load(&[
            ("TICKER_RELAY_RECONNECT_DELAY_MS", "100"),
            ("TICKER_RELAY_RECONNECT_MULTIPLIER", "2.0"),
        ])
        .unwrap();
        assert_eq!(config.websocket.reconnect_delay_max, Duration::from_secs(5));
    }

    #[test]
    fn rejects_initial_delay_above_explicit_max() {
        let err = load(&[
            ("TICKER_RELAY_RECONNECT_DELAY_MS", "10000"),
            ("TICKER_RELAY_RECONNECT_DELAY_MAX_MS", "5000"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ReconnectDelayAboveMax {
                initial_ms: 10_000,
                max_ms: 5_000,
            }
        );
    }

    #[test_case("TICKER_RELAY_HEARTBEAT_INTERVAL_SECS" ; "heartbeat interval")]
    #[test_case("TICKER_RELAY_HEARTBEAT_TIMEOUT_SECS" ; "heartbeat timeout")]
    #[test_case("TICKER_RELAY_RECONNECT_DELAY_MS" ; "reconnect delay")]
    #[test_case("TICKER_RELAY_SEND_TIMEOUT_MS" ; "send timeout")]
    fn rejects_zero_duration(key: &str) {
        let err = load(&[(key, "0")]).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity(key.to_string()));
    }

    #[test_case("NaN" ; "nan")]
    #[test_case("inf" ; "infinite")]
    #[test_case("-2.0" ; "negative")]
    #[test_case("0.5" ; "shrinking")]
    fn rejects_unusable_multiplier(value: &str) {
        let err = load(&[("TICKER_RELAY_RECONNECT_MULTIPLIER", value)]).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidValue {
                    key: "TICKER_RELAY_RECONNECT_MULTIPLIER",
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test_case("NaN" ; "nan")]
    #[test_case("inf" ; "infinite")]
    #[test_case("-0.1" ; "negative")]
    #[test_case("1.5" ; "above one")]
    fn rejects_unusable_jitter(value: &str) {
        let err = load(&[("TICKER_RELAY_RECONNECT_JITTER", value)]).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidValue {
                    key: "TICKER_RELAY_RECONNECT_JITTER",
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test_case("1.0", "0.0" ; "fixed delay")]
    #[test_case("2.0", "0.25" ; "backoff with jitter")]
    #[test_case("1.5", "1.0" ; "full jitter")]
    fn accepts_usable_backoff(multiplier: &str, jitter: &str) {
        let config = load(&[
            ("TICKER_RELAY_RECONNECT_MULTIPLIER", multiplier),
            ("TICKER_RELAY_RECONNECT_JITTER", jitter),
        ])
        .unwrap();
        assert!(config.websocket.reconnect_delay_multiplier >= 1.0);
    }
}
