//! Error types for doh-network.

use std::time::Duration;

use crate::dial::Transport;

/// Result type alias for doh-network operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, dialing or sending HTTP requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to parse network config: {0}")]
    ConfigParse(String),

    #[error("Timeout should be a positive number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("DoH host '{0}' should be an IP address")]
    InvalidDohHost(String),

    #[error("Invalid user agent: {0}")]
    InvalidUserAgent(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid address (expected host:port): {0}")]
    InvalidAddress(String),

    #[error("Cannot find any ips for {transport}:{host}")]
    NoAddresses { transport: Transport, host: String },

    #[error("Cannot resolve dns names for {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Cannot dial to {transport}:{address}: {source}")]
    Dial {
        transport: Transport,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid DNS name '{name}': {message}")]
    InvalidDnsName { name: String, message: String },

    #[error("Invalid DNS message: {0}")]
    DnsMessage(String),

    #[error("No DNS records found for '{0}'")]
    DnsNoRecords(String),

    #[error("DNS error: RCODE={0}")]
    DnsError(u16),

    #[error("DoH server returned error: {0}")]
    DohServerError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("URI has no host: {0}")]
    NoHost(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),

    #[error("HTTP body error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the caller's context rather than the network.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Cancelled => std::io::Error::new(std::io::ErrorKind::Interrupted, err),
            Error::DeadlineExceeded | Error::Timeout(_) => {
                std::io::Error::new(std::io::ErrorKind::TimedOut, err)
            }
            other => std::io::Error::other(other),
        }
    }
}
