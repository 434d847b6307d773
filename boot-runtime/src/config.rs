//! Runtime configuration.

use std::time::Duration;

use boot_capture::CaptureConfig;
use boot_types::ClientIdentity;

/// Environment variable overriding [`BootConfig::startup_timeout`].
pub const ENV_STARTUP_TIMEOUT: &str = "MCP_BOOT_STARTUP_TIMEOUT_MS";
/// Environment variable overriding [`BootConfig::handler_timeout`].
pub const ENV_HANDLER_TIMEOUT: &str = "MCP_BOOT_HANDLER_TIMEOUT_MS";
/// Environment variable overriding [`BootConfig::request_timeout`].
pub const ENV_REQUEST_TIMEOUT: &str = "MCP_BOOT_REQUEST_TIMEOUT_MS";
/// Environment variable overriding [`BootConfig::settle_delay`].
pub const ENV_SETTLE_DELAY: &str = "MCP_BOOT_SETTLE_DELAY_MS";
/// Environment variable overriding the capture debounce interval.
pub const ENV_LOG_DEBOUNCE: &str = "MCP_BOOT_LOG_DEBOUNCE_MS";

/// Deadlines and defaults for one boot context.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// How long to wait for user code to publish its server.
    pub startup_timeout: Duration,
    /// How long to wait for the OAuth provider or callback handler.
    pub handler_timeout: Duration,
    /// Per-request timeout for protocol calls, including the handshake.
    pub request_timeout: Duration,
    /// Pause after a message batch so trailing server notifications land.
    ///
    /// Zero skips the pause.
    pub settle_delay: Duration,
    /// Output capture tuning.
    pub capture: CaptureConfig,
    /// Identity used when an envelope names no client.
    pub default_client: ClientIdentity,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(100),
            handler_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(100),
            capture: CaptureConfig::default(),
            default_client: ClientIdentity::new("mcp-boot", "1.0.0"),
        }
    }
}

impl BootConfig {
    /// Defaults overlaid with millisecond overrides from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with millisecond overrides from `lookup`.
    ///
    /// Values that do not parse as a whole number of milliseconds are
    /// ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str| -> Option<Duration> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(e) => {
                    tracing::warn!(key, value = %raw, error = %e, "ignoring invalid duration");
                    None
                }
            }
        };
        if let Some(d) = millis(ENV_STARTUP_TIMEOUT) {
            config.startup_timeout = d;
        }
        if let Some(d) = millis(ENV_HANDLER_TIMEOUT) {
            config.handler_timeout = d;
        }
        if let Some(d) = millis(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = d;
        }
        if let Some(d) = millis(ENV_SETTLE_DELAY) {
            config.settle_delay = d;
        }
        if let Some(d) = millis(ENV_LOG_DEBOUNCE) {
            config.capture.debounce = d;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = BootConfig::default();
        assert_eq!(config.startup_timeout, Duration::from_millis(100));
        assert_eq!(config.handler_timeout, Duration::from_millis(50));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.capture.debounce, Duration::from_millis(100));
        assert_eq!(config.default_client.name, "mcp-boot");
        assert_eq!(config.default_client.version, "1.0.0");
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_STARTUP_TIMEOUT, "250"),
            (ENV_SETTLE_DELAY, " 0 "),
            (ENV_LOG_DEBOUNCE, "5"),
            (ENV_REQUEST_TIMEOUT, "soon"),
        ]);
        let config = BootConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.startup_timeout, Duration::from_millis(250));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.capture.debounce, Duration::from_millis(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.handler_timeout, Duration::from_millis(50));
    }
}
