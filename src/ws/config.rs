#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::HashSet;
use std::time::Duration;

use url::Url;

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(20);
const DEFAULT_PONG_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const UNBOUNDED_INITIAL_BACKOFF_DURATION: Duration = Duration::from_millis(500);
const UNBOUNDED_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_FACTOR: f64 = 0.3;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_QUEUE_TTL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_HEALTH_CHECK_INTERVAL_DURATION: Duration = Duration::from_secs(30);

/// Configuration for the realtime connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum time a single connection attempt may take before it counts as failed
    pub connect_timeout: Duration,
    /// Ping/pong liveness detection
    pub keepalive: KeepaliveConfig,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Guard against reconnect storms
    pub circuit_breaker: CircuitBreakerConfig,
    /// Outbound buffering while offline
    pub queue: QueueConfig,
    /// Periodic probe that revives a connection after reconnection gave up.
    /// `None` leaves an exhausted connection disabled until `connect()` is called.
    pub health_check: Option<HealthCheckConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            keepalive: KeepaliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
            health_check: Some(HealthCheckConfig::default()),
        }
    }
}

/// Configuration for the ping/pong keepalive.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Interval between client PINGs; the first one is sent right after the socket opens
    pub ping_interval: Duration,
    /// Maximum time to wait for a PONG before the link is considered stale
    pub pong_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL_DURATION,
            pong_timeout: DEFAULT_PONG_TIMEOUT_DURATION,
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter, in `[0, 1]`. `0` disables jitter.
    pub jitter_factor: f64,
}

impl ReconnectConfig {
    /// Give up after `max_attempts` consecutive failures.
    #[must_use]
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Never give up, retrying at most a few seconds apart.
    ///
    /// Suited to deployments where the server restarts transparently behind a proxy.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: UNBOUNDED_INITIAL_BACKOFF_DURATION,
            max_backoff: UNBOUNDED_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Override the backoff range.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Override the jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Configuration for the connection circuit breaker.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a half-open probe is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT_DURATION,
        }
    }
}

/// Configuration for the outbound queue used while offline.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued messages. `0` disables queueing.
    pub capacity: usize,
    /// Queued messages older than this are discarded instead of sent
    pub ttl: Duration,
    /// Channels whose messages survive eviction longer than the rest
    pub priority_channels: HashSet<String>,
}

impl QueueConfig {
    /// Mark `channel` as a priority channel.
    #[must_use]
    pub fn with_priority_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.priority_channels.insert(channel.into());
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            ttl: DEFAULT_QUEUE_TTL_DURATION,
            priority_channels: HashSet::new(),
        }
    }
}

/// Configuration for the external health check that revives a disabled connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time between probes
    pub interval: Duration,
    /// Absolute URL to probe
    pub url: Option<Url>,
    /// Path resolved against the WebSocket endpoint (scheme downgraded to http/https).
    /// Ignored when `url` is set.
    pub path: Option<String>,
}

impl HealthCheckConfig {
    /// Probe an absolute URL.
    #[must_use]
    pub fn url(url: Url) -> Self {
        Self {
            url: Some(url),
            ..Self::default()
        }
    }

    /// Probe a path on the WebSocket host, e.g. `/health`.
    #[must_use]
    pub fn path<S: Into<String>>(path: S) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Override the probe interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_CHECK_INTERVAL_DURATION,
            url: None,
            path: None,
        }
    }
}
