//! Network configuration.
//!
//! The configuration can be built in code or parsed from an INI file:
//!
//! ```ini
//! [Network]
//! UserAgent = my-proxy/1.0
//! DohHost = 9.9.9.9
//! HttpTimeout = 10
//! ```

use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeout used for HTTP clients when the configuration leaves it at zero.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of the HTTP client that carries DoH queries.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Quad9.
pub const DEFAULT_DOH_HOST: &str = "9.9.9.9";

pub const DEFAULT_USER_AGENT: &str = concat!("doh-network/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    #[serde(default)]
    network: Option<NetworkSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSection {
    user_agent: Option<String>,
    doh_host: Option<String>,
    http_timeout: Option<f64>,
}

/// Inputs for [`Network::new`](crate::Network::new).
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Value stamped into the `User-Agent` header of every request.
    pub user_agent: String,
    /// Literal IP address of the DoH server.
    pub doh_host: String,
    /// HTTP request timeout in seconds. Zero selects [`DEFAULT_HTTP_TIMEOUT`];
    /// negative values are rejected.
    pub http_timeout: f64,
}

impl NetworkConfig {
    pub fn new(user_agent: impl Into<String>, doh_host: impl Into<String>, http_timeout: f64) -> Self {
        Self {
            user_agent: user_agent.into(),
            doh_host: doh_host.into(),
            http_timeout,
        }
    }

    /// Parse a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigParse(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse a configuration from a string. Missing keys keep their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_ini::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        let section = raw.network.unwrap_or_default();
        let defaults = Self::default();

        Ok(Self {
            user_agent: section.user_agent.unwrap_or(defaults.user_agent),
            doh_host: section.doh_host.unwrap_or(defaults.doh_host),
            http_timeout: section.http_timeout.unwrap_or(defaults.http_timeout),
        })
    }

    /// The effective HTTP timeout.
    pub fn http_timeout(&self) -> Result<Duration> {
        if self.http_timeout == 0.0 {
            return Ok(DEFAULT_HTTP_TIMEOUT);
        }

        Duration::try_from_secs_f64(self.http_timeout)
            .map_err(|_| Error::InvalidTimeout(self.http_timeout))
    }

    /// The DoH server address. Hostnames are rejected: resolving them would
    /// need the resolver being configured.
    pub fn doh_host(&self) -> Result<IpAddr> {
        self.doh_host
            .parse()
            .map_err(|_| Error::InvalidDohHost(self.doh_host.clone()))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            doh_host: DEFAULT_DOH_HOST.to_string(),
            http_timeout: 0.0,
        }
    }
}
