//! Outbound connectivity with DNS-over-HTTPS resolution and address failover.
//!
//! This crate provides:
//! - A [`Dial`] primitive abstraction with a plain [`TcpDialer`]
//! - A DNS-over-HTTPS resolver that queries A and AAAA records concurrently
//! - [`Network`], which resolves a host, shuffles its addresses and dials
//!   them one after another until one connects
//! - An [`HttpClient`] that connects through the same path and always sends
//!   the configured `User-Agent`
//!
//! The operating system's resolver is never used: the DoH server is addressed
//! by a literal IP and reached through the raw dialer.
//!
//! # Example
//!
//! ```no_run
//! use doh_network::{Network, NetworkConfig, TcpDialer, Transport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NetworkConfig::new("my-proxy/1.0", "1.1.1.1", 10.0);
//!     let network = Network::new(Arc::new(TcpDialer::new()), &config)?;
//!
//!     // A raw connection, with failover across the resolved addresses
//!     let conn = network.dial(Transport::Tcp, "example.com:443").await?;
//!
//!     // An HTTP client routed through the same path
//!     let client = network.make_http_client(None)?;
//!     let response = client.get("https://example.com/").await?;
//!     println!("{}", response.status());
//!     # drop(conn);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
mod connector;
pub mod dial;
pub mod dns;
pub mod error;
mod network;

// Re-export main types
pub use client::{Body, HttpClient, DEFAULT_MAX_BODY_SIZE};
pub use config::{
    NetworkConfig, DEFAULT_DOH_HOST, DEFAULT_HTTP_TIMEOUT, DEFAULT_USER_AGENT, DNS_TIMEOUT,
};
pub use connector::{DialConnector, DialStream};
pub use dial::{BoxConn, CancelHandle, Conn, Context, Dial, Dialing, TcpDialer, Transport};
pub use dns::{DnsExchange, DohResolver, HttpsExchange};
pub use error::{Error, Result};
pub use network::{shuffle_candidates, Network};
