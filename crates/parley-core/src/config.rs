//! Core configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can run with zero
//! configuration in tests and local development.

use std::time::Duration;

/// Tunables for the presence tracker and the delivery pipeline.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a connected user may go without a heartbeat before the
    /// tracker autonomously marks them offline.
    /// Env: `PARLEY_HEARTBEAT_TIMEOUT_SECS`
    /// Default: 30s
    pub heartbeat_timeout: Duration,

    /// How often the presence sweeper checks for timed-out users.
    /// Env: `PARLEY_SWEEP_INTERVAL_SECS`
    /// Default: 5s
    pub sweep_interval: Duration,

    /// Maximum number of append attempts (including the first) before a
    /// persistence failure is surfaced to the caller.
    /// Env: `PARLEY_APPEND_MAX_ATTEMPTS`
    /// Default: 4
    pub append_max_attempts: u32,

    /// Base delay of the exponential backoff between append attempts.
    /// Doubled per attempt and jittered.
    /// Env: `PARLEY_APPEND_BACKOFF_MS`
    /// Default: 50ms
    pub append_backoff_base: Duration,

    /// Upper bound on a single backoff delay.
    /// Env: `PARLEY_APPEND_BACKOFF_CAP_MS`
    /// Default: 5s
    pub append_backoff_cap: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            append_max_attempts: 4,
            append_backoff_base: Duration::from_millis(50),
            append_backoff_cap: Duration::from_secs(5),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_env_u64("PARLEY_HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("PARLEY_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_env_u64("PARLEY_APPEND_MAX_ATTEMPTS") {
            config.append_max_attempts = n.max(1) as u32;
        }
        if let Some(ms) = parse_env_u64("PARLEY_APPEND_BACKOFF_MS") {
            config.append_backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env_u64("PARLEY_APPEND_BACKOFF_CAP_MS") {
            config.append_backoff_cap = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_env_u64(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.append_max_attempts, 4);
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("PARLEY_APPEND_MAX_ATTEMPTS", "7");
        let config = CoreConfig::from_env();
        assert_eq!(config.append_max_attempts, 7);
        std::env::remove_var("PARLEY_APPEND_MAX_ATTEMPTS");
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        std::env::set_var("PARLEY_HEARTBEAT_TIMEOUT_SECS", "not-a-number");
        let config = CoreConfig::from_env();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        std::env::remove_var("PARLEY_HEARTBEAT_TIMEOUT_SECS");
    }
}
