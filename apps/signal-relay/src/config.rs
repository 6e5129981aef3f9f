use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Sentinel URL selecting the in-process implementation of a backend.
pub const MEMORY_BACKEND: &str = "memory";

/// Signal relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the HTTP/WebSocket server binds to.
    pub host: String,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Directory Service origin (e.g. `http://127.0.0.1:50051`), or `memory`.
    pub directory_url: String,
    /// Upper bound for a single Directory Service call.
    pub directory_timeout: Duration,
    /// Redis URL for the event bus, or `memory` for a single-node relay.
    pub redis_url: String,
    /// First delay before reconnecting a dropped bus connection.
    pub bus_retry_initial: Duration,
    /// Cap for the exponential reconnect backoff.
    pub bus_retry_max: Duration,
    /// Per-connection outbound queue length before the peer is dropped.
    pub outbound_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            directory_url: "http://127.0.0.1:50051".to_string(),
            directory_timeout: Duration::from_millis(3000),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            bus_retry_initial: Duration::from_millis(250),
            bus_retry_max: Duration::from_millis(10_000),
            outbound_queue_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("SIGNALING_HOST").unwrap_or(defaults.host),
            port: parsed_var("SIGNALING_PORT", defaults.port),
            directory_url: std::env::var("DIRECTORY_URL").unwrap_or(defaults.directory_url),
            directory_timeout: millis_var("DIRECTORY_TIMEOUT_MS", defaults.directory_timeout),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            bus_retry_initial: millis_var("BUS_RETRY_INITIAL_MS", defaults.bus_retry_initial),
            bus_retry_max: millis_var("BUS_RETRY_MAX_MS", defaults.bus_retry_max),
            outbound_queue_capacity: parsed_var(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            )
            .max(1),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip = IpAddr::from_str(&self.host)?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
