//! Proxy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::is_unicast;

/// Proxy configuration, shared read-only by every session of a supervisor.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Allow targets outside the globally routable unicast range
    /// (loopback, private networks, multicast, ...)
    pub allow_non_unicast: bool,
    /// Outbound connect timeout
    pub connect_timeout: Duration,
    /// How long a stopping session waits for the channel close handshake
    pub close_timeout: Duration,
    /// Log a diagnostics snapshot this often, if set
    pub snapshot_interval: Option<Duration>,
}

impl ProxyConfig {
    /// Whether a session may talk to `address`.
    ///
    /// Anything that does not parse as an IP address is refused when
    /// non-unicast targets are restricted.
    pub fn is_allowed_address(&self, address: &str) -> bool {
        if self.allow_non_unicast {
            return true;
        }
        address
            .parse()
            .map(|ip| is_unicast(&ip))
            .unwrap_or(false)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be non-zero"));
        }
        if self.close_timeout.is_zero() {
            return Err(Error::config("close_timeout must be non-zero"));
        }
        if self.snapshot_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config("snapshot_interval must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_non_unicast: false,
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(crate::DEFAULT_CLOSE_TIMEOUT_SECS),
            snapshot_interval: None,
        }
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfigFile {
    /// Allow non-unicast targets
    #[serde(default)]
    pub allow_non_unicast: bool,
    /// Connect timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Channel close handshake timeout (seconds)
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Snapshot logging interval (seconds); absent disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_interval_secs: Option<u64>,
}

fn default_connect_timeout_secs() -> u64 {
    crate::DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_close_timeout_secs() -> u64 {
    crate::DEFAULT_CLOSE_TIMEOUT_SECS
}

impl ProxyConfigFile {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<ProxyConfig> {
        let config = ProxyConfig {
            allow_non_unicast: self.allow_non_unicast,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            snapshot_interval: self.snapshot_interval_secs.map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            allow_non_unicast: config.allow_non_unicast,
            connect_timeout_secs: config.connect_timeout.as_secs(),
            close_timeout_secs: config.close_timeout.as_secs(),
            snapshot_interval_secs: config.snapshot_interval.map(|i| i.as_secs()),
        }
    }
}
