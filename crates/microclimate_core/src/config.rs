use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:9090";

/// Seconds the debugger is given to become reachable before attach gives up.
pub const DEFAULT_DEBUG_CONNECT_TIMEOUT_SECS: i64 = 3;

#[derive(Debug, Clone)]
pub struct McConfig {
    pub server_url: String,
    pub request_timeout: Duration,
    pub debug_connect_timeout_secs: i64,
    pub negotiate_interval: Duration,
    pub health_check_interval: Duration,
    pub poll_interval: Duration,
    pub launch_dir: Option<PathBuf>,
}

impl Default for McConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            debug_connect_timeout_secs: DEFAULT_DEBUG_CONNECT_TIMEOUT_SECS,
            negotiate_interval: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            launch_dir: None,
        }
    }
}

impl McConfig {
    pub fn new(server_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            server_url: server_url.into(),
            request_timeout,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let server_url =
            std::env::var("MC_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        let request_timeout = env_millis("MC_REQUEST_TIMEOUT_MS").unwrap_or(defaults.request_timeout);

        let debug_connect_timeout_secs = std::env::var("MC_DEBUG_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_DEBUG_CONNECT_TIMEOUT_SECS);

        let health_check_interval =
            env_millis("MC_HEALTH_CHECK_INTERVAL_MS").unwrap_or(defaults.health_check_interval);

        let poll_interval = env_millis("MC_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval);

        let launch_dir = std::env::var("MC_LAUNCH_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            server_url,
            request_timeout,
            debug_connect_timeout_secs,
            negotiate_interval: defaults.negotiate_interval,
            health_check_interval,
            poll_interval,
            launch_dir,
        }
    }

    pub fn debug_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.debug_connect_timeout_secs.max(0) as u64)
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = McConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:9090");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.debug_connect_timeout_secs, 3);
        assert_eq!(config.negotiate_interval, Duration::from_secs(1));
        assert!(config.launch_dir.is_none());
    }

    #[test]
    fn test_new_config() {
        let config = McConfig::new("http://mc.example:9191", Duration::from_secs(4));
        assert_eq!(config.server_url, "http://mc.example:9191");
        assert_eq!(config.request_timeout, Duration::from_secs(4));
        assert_eq!(config.debug_connect_timeout_secs, 3);
    }

    #[test]
    fn test_debug_connect_timeout_clamps_negative() {
        let config = McConfig {
            debug_connect_timeout_secs: -5,
            ..McConfig::default()
        };
        assert_eq!(config.debug_connect_timeout(), Duration::ZERO);
    }

    // Both env cases live in one test so they cannot race each other.
    #[test]
    fn test_from_env() {
        std::env::remove_var("MC_SERVER_URL");
        std::env::remove_var("MC_DEBUG_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("MC_POLL_INTERVAL_MS");
        std::env::remove_var("MC_LAUNCH_DIR");

        let config = McConfig::from_env();
        assert_eq!(config.server_url, "http://127.0.0.1:9090");
        assert_eq!(config.debug_connect_timeout_secs, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(2));

        std::env::set_var("MC_SERVER_URL", "http://custom:9999");
        std::env::set_var("MC_DEBUG_CONNECT_TIMEOUT_SECS", "10");
        std::env::set_var("MC_POLL_INTERVAL_MS", "500");
        std::env::set_var("MC_LAUNCH_DIR", "/tmp/mc-launches");

        let config = McConfig::from_env();
        assert_eq!(config.server_url, "http://custom:9999");
        assert_eq!(config.debug_connect_timeout_secs, 10);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.launch_dir, Some(PathBuf::from("/tmp/mc-launches")));

        std::env::remove_var("MC_SERVER_URL");
        std::env::remove_var("MC_DEBUG_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("MC_POLL_INTERVAL_MS");
        std::env::remove_var("MC_LAUNCH_DIR");
    }
}
