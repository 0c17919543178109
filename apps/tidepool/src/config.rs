use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::events::Platform;

pub const ROUTE_TIMEOUT_ENV: &str = "TIDEPOOL_ROUTE_TIMEOUT_MS";
pub const MAX_NORMAL_INTERVAL_ENV: &str = "TIDEPOOL_MAX_NORMAL_INTERVAL_MS";
pub const MESSAGE_LOG_LIMIT_ENV: &str = "TIDEPOOL_MESSAGE_LOG_LIMIT";
pub const PLATFORM_ENV: &str = "TIDEPOOL_PLATFORM";

const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_millis(4000);
const DEFAULT_MAX_NORMAL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MESSAGE_LOG_LIMIT: usize = 500;

/// Per-session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for the backend route to come up.
    pub route_timeout: Duration,
    /// Minimum spacing between normal (non-quick) requests.
    pub max_normal_interval: Duration,
    pub message_log_limit: usize,
    pub platform: Platform,
    /// Keep the host view open when the route is lost.
    pub persist: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            route_timeout: DEFAULT_ROUTE_TIMEOUT,
            max_normal_interval: DEFAULT_MAX_NORMAL_INTERVAL,
            message_log_limit: DEFAULT_MESSAGE_LOG_LIMIT,
            platform: Platform::current(),
            persist: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on malformed values.
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|err| {
            tracing::warn!(target = "config::env", error = %err, "using default session config");
            Self::default()
        })
    }

    pub fn try_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = read_u64(ROUTE_TIMEOUT_ENV)? {
            config.route_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(MAX_NORMAL_INTERVAL_ENV)? {
            config.max_normal_interval = Duration::from_millis(ms);
        }
        if let Some(limit) = read_u64(MESSAGE_LOG_LIMIT_ENV)? {
            config.message_log_limit = usize::try_from(limit).map_err(|_| ConfigError::Invalid {
                var: MESSAGE_LOG_LIMIT_ENV,
                value: limit.to_string(),
            })?;
        }
        if let Ok(raw) = env::var(PLATFORM_ENV) {
            config.platform = raw.parse().map_err(|_| ConfigError::Invalid {
                var: PLATFORM_ENV,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

fn read_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 4] = [
        ROUTE_TIMEOUT_ENV,
        MAX_NORMAL_INTERVAL_ENV,
        MESSAGE_LOG_LIMIT_ENV,
        PLATFORM_ENV,
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.route_timeout, Duration::from_millis(4000));
        assert_eq!(config.max_normal_interval, Duration::from_millis(100));
        assert_eq!(config.message_log_limit, 500);
        assert!(!config.persist);
    }

    #[test]
    fn from_env_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ROUTE_TIMEOUT_ENV, "250");
            env::set_var(MAX_NORMAL_INTERVAL_ENV, " 40 ");
            env::set_var(PLATFORM_ENV, "mac");
        }
        let config = SessionConfig::try_from_env().expect("valid env");
        assert_eq!(config.route_timeout, Duration::from_millis(250));
        assert_eq!(config.max_normal_interval, Duration::from_millis(40));
        assert_eq!(config.platform, Platform::Mac);
        clear_env();
    }

    #[test]
    fn malformed_values_are_reported() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(MESSAGE_LOG_LIMIT_ENV, "lots");
        }
        let err = SessionConfig::try_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: MESSAGE_LOG_LIMIT_ENV,
                ..
            }
        ));
        assert_eq!(SessionConfig::from_env().message_log_limit, 500);
        clear_env();
    }
}
