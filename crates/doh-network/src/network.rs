//! Resolve-then-dial network capability.

use crate::client::HttpClient;
use crate::config::{NetworkConfig, DNS_TIMEOUT};
use crate::dial::{split_host_port, BoxConn, Context, Dial, Dialing, Transport};
use crate::dns::DohResolver;
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Outbound connectivity that never touches the system resolver.
///
/// Hostnames are resolved over DNS-over-HTTPS, the candidate addresses are
/// shuffled and then dialed one after another until one connects. The
/// configuration is fixed at construction; clones share it.
///
/// # Example
///
/// ```no_run
/// use doh_network::{Network, NetworkConfig, TcpDialer, Transport};
/// use std::sync::Arc;
///
/// # async fn example() -> doh_network::Result<()> {
/// let config = NetworkConfig::new("my-proxy/1.0", "9.9.9.9", 10.0);
/// let network = Network::new(Arc::new(TcpDialer::new()), &config)?;
///
/// let conn = network.dial(Transport::Tcp, "example.com:443").await?;
///
/// let client = network.make_http_client(None)?;
/// let response = client.get("https://example.com/").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

struct Inner {
    dialer: Arc<dyn Dial>,
    resolver: DohResolver,
    user_agent: String,
    http_timeout: Duration,
}

impl Network {
    /// Validate `config` and build the network on top of `dialer`.
    ///
    /// DoH queries go through an HTTP client that dials `dialer` directly
    /// and uses [`DNS_TIMEOUT`], independent of the configured HTTP timeout.
    pub fn new(dialer: Arc<dyn Dial>, config: &NetworkConfig) -> Result<Self> {
        let http_timeout = config.http_timeout()?;
        let doh_host = config.doh_host()?;

        let dns_client = HttpClient::new(&config.user_agent, DNS_TIMEOUT, dialer.clone())?;
        let resolver = DohResolver::new(doh_host, dns_client);

        log::debug!(
            "Network ready: DoH server {}, HTTP timeout {:?}",
            doh_host,
            http_timeout
        );

        Ok(Self::with_resolver(
            dialer,
            resolver,
            config.user_agent.clone(),
            http_timeout,
        ))
    }

    /// Assemble a network from an already-built resolver.
    pub fn with_resolver(
        dialer: Arc<dyn Dial>,
        resolver: DohResolver,
        user_agent: impl Into<String>,
        http_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialer,
                resolver,
                user_agent: user_agent.into(),
                http_timeout,
            }),
        }
    }

    pub fn resolver(&self) -> &DohResolver {
        &self.inner.resolver
    }

    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    pub fn http_timeout(&self) -> Duration {
        self.inner.http_timeout
    }

    /// Dial `address` (`host:port`) without a deadline.
    pub async fn dial(&self, transport: Transport, address: &str) -> Result<BoxConn> {
        self.dial_context(&Context::background(), transport, address)
            .await
    }

    /// Resolve the host of `address` and dial its addresses in random order.
    ///
    /// Returns the first connection that succeeds. When every candidate
    /// fails, only the last dial error is reported.
    pub async fn dial_context(
        &self,
        ctx: &Context,
        transport: Transport,
        address: &str,
    ) -> Result<BoxConn> {
        let (host, port) = split_host_port(address)?;

        let mut ips = self
            .inner
            .resolver
            .resolve(ctx, transport, &host)
            .await
            .map_err(|e| Error::Resolve {
                address: address.to_string(),
                source: Box::new(e),
            })?;

        if ips.len() > 1 {
            shuffle_candidates(&mut ips);
        }

        let mut last_error = None;
        for ip in ips {
            let candidate = SocketAddr::new(ip, port).to_string();

            match self
                .inner
                .dialer
                .dial_context(ctx, transport, &candidate)
                .await
            {
                Ok(conn) => {
                    log::info!("Connected to {} via {}", address, candidate);
                    return Ok(conn);
                }
                Err(e) => {
                    log::debug!("Dial to {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no candidate addresses"));
        log::warn!("Cannot dial to {}:{}: {}", transport, address, source);

        Err(Error::Dial {
            transport,
            address: address.to_string(),
            source,
        })
    }

    /// Build an HTTP client with this network's user agent and timeout.
    ///
    /// Connections go through `dial` when given, otherwise through
    /// [`dial_context`](Self::dial_context).
    pub fn make_http_client(&self, dial: Option<Arc<dyn Dial>>) -> Result<HttpClient> {
        let dial: Arc<dyn Dial> = match dial {
            Some(dial) => dial,
            None => Arc::new(self.clone()),
        };
        HttpClient::new(&self.inner.user_agent, self.inner.http_timeout, dial)
    }
}

impl Dial for Network {
    fn dial_context(&self, ctx: &Context, transport: Transport, address: &str) -> Dialing {
        let network = self.clone();
        let ctx = ctx.clone();
        let address = address.to_string();

        Box::pin(async move {
            network
                .dial_context(&ctx, transport, &address)
                .await
                .map_err(io::Error::from)
        })
    }
}

/// Put `candidates` in uniformly random order.
pub fn shuffle_candidates(candidates: &mut [IpAddr]) {
    candidates.shuffle(&mut rand::thread_rng());
}
