//! Server configuration loaded from environment variables

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port to listen on (all interfaces)
    pub port: u16,
    /// Directory served to plain HTTP requests
    pub static_dir: PathBuf,
    /// How often the liveness sweep runs
    pub ping_interval: Duration,
    /// Upper bound on a single socket write
    pub send_timeout: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl Config {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let port = env_number("PORT", DEFAULT_PORT);

        let static_dir = std::env::var("STATIC_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        let ping_interval = Duration::from_secs(env_number(
            "PING_INTERVAL_SECS",
            DEFAULT_PING_INTERVAL_SECS,
        ));
        let send_timeout =
            Duration::from_secs(env_number("SEND_TIMEOUT_SECS", DEFAULT_SEND_TIMEOUT_SECS));
        let outbound_queue = env_number("OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE);

        tracing::info!(
            port,
            static_dir = %static_dir.display(),
            ping_interval_secs = ping_interval.as_secs(),
            send_timeout_secs = send_timeout.as_secs(),
            outbound_queue,
            "Config loaded"
        );

        Self {
            port,
            static_dir,
            ping_interval,
            send_timeout,
            outbound_queue,
        }
    }
}

/// Read a positive number from `key`; unset, unparseable or zero values yield `default`
fn env_number<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default + Copy,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid value, using default");
            default
        }
    }
}
