//! Dial primitive, transport kinds and cancellable dial contexts.
//!
//! Everything above this module (the failover connector, the HTTP connector
//! and the resolver's own HTTP client) opens connections through the [`Dial`]
//! trait. [`TcpDialer`] is the stock implementation on top of
//! `tokio::net::TcpStream`.

use crate::error::{Error, Result};
use futures_util::future::select_all;
use std::fmt;
use std::future::{pending, Future};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default connect timeout of [`TcpDialer`].
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport kind requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP over either address family.
    Tcp,
    /// TCP over IPv4 only.
    Tcp4,
    /// TCP over IPv6 only.
    Tcp6,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tcp4 => "tcp4",
            Transport::Tcp6 => "tcp6",
        }
    }

    /// Whether IPv4 (A record) candidates are wanted.
    pub fn wants_ipv4(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Tcp4)
    }

    /// Whether IPv6 (AAAA record) candidates are wanted.
    pub fn wants_ipv6(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Tcp6)
    }

    /// Whether `ip` can be dialed over this transport.
    pub fn permits(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(_) => self.wants_ipv4(),
            IpAddr::V6(_) => self.wants_ipv6(),
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "tcp4" => Ok(Transport::Tcp4),
            "tcp6" => Ok(Transport::Tcp6),
            other => Err(Error::UnsupportedTransport(other.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cancellable, optionally deadline-bound scope for dialing and resolving.
///
/// Contexts are cheap to clone. Derived contexts keep every cancellation
/// source of their parent and the earliest deadline.
///
/// # Example
///
/// ```no_run
/// use doh_network::Context;
/// use std::time::Duration;
///
/// let (ctx, cancel) = Context::background().with_cancel();
/// let ctx = ctx.with_timeout(Duration::from_secs(3));
/// // ... hand `ctx` to a dial, call `cancel.cancel()` to abort it.
/// # drop((ctx, cancel));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] derived from [`Context::with_cancel`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that expires after `timeout`.
    ///
    /// A timeout too large to represent as an instant (e.g. `Duration::MAX`)
    /// adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context that expires at `deadline` (or earlier, if the
    /// parent already expires earlier).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Derive a context together with a handle that cancels it.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut cancel = self.cancel.clone();
        cancel.push(rx);
        (
            Self {
                deadline: self.deadline,
                cancel,
            },
            CancelHandle { tx },
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once any cancellation source fires. Never resolves for a
    /// context without one.
    pub async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return pending().await;
        }

        let waits = self.cancel.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                // A dropped handle can no longer cancel.
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            _ = expired => Err(Error::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// A bidirectional byte stream returned by a [`Dial`] implementation.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed connection handed out by dialers.
pub type BoxConn = Box<dyn Conn>;

/// Alias for the `Future` type returned by a dialer.
pub type Dialing = Pin<Box<dyn Future<Output = io::Result<BoxConn>> + Send>>;

/// Capability that opens a connection to a `host:port` address.
///
/// Implementations must honour the context: a cancelled or expired context
/// must stop the attempt.
pub trait Dial: Send + Sync {
    fn dial_context(&self, ctx: &Context, transport: Transport, address: &str) -> Dialing;
}

impl<D: Dial + ?Sized> Dial for Arc<D> {
    fn dial_context(&self, ctx: &Context, transport: Transport, address: &str) -> Dialing {
        (**self).dial_context(ctx, transport, address)
    }
}

/// Plain TCP dialer for literal `ip:port` addresses.
///
/// Hostnames are rejected rather than handed to the operating system's
/// resolver.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DIAL_TIMEOUT)
    }

    /// Create a dialer whose individual connect attempts give up after `connect_timeout`.
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dial for TcpDialer {
    fn dial_context(&self, ctx: &Context, transport: Transport, address: &str) -> Dialing {
        let ctx = ctx.clone();
        let address = address.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let addr: SocketAddr = address.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a literal ip:port", address),
                )
            })?;

            if !transport.permits(addr.ip()) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} cannot be dialed over {}", addr, transport),
                ));
            }

            log::debug!("Dialing {} over {}", addr, transport);
            let connecting = tokio::time::timeout(connect_timeout, TcpStream::connect(addr));
            let stream = match ctx.run(connecting).await? {
                Ok(stream) => stream?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, connect_timeout),
                    ))
                }
            };
            stream.set_nodelay(true)?;

            Ok(Box::new(stream) as BoxConn)
        })
    }
}

/// Split a `host:port` address. IPv6 hosts must be bracketed: `[::1]:443`.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let invalid = || Error::InvalidAddress(address.to_string());

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = tail.strip_prefix(':').ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        // An unbracketed host must not contain further colons.
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;

    Ok((host.to_string(), port))
}
