//! Custom connector for hyper that opens connections through a [`Dial`].
//!
//! This module provides a tower::Service that turns a request URI into a
//! connection: it asks the configured dialer for `host:port` and wraps the
//! result in TLS for `https` URIs.

use crate::dial::{BoxConn, Context, Dial, Transport};
use crate::error::{Error, Result};
use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower_service::Service;

/// A connector that creates connections through an arbitrary dialer.
///
/// Handing it a [`Network`](crate::Network) routes every connection through
/// DoH resolution and address failover; handing it a
/// [`TcpDialer`](crate::TcpDialer) dials literal addresses directly.
#[derive(Clone)]
pub struct DialConnector {
    dial: Arc<dyn Dial>,
    tls_connector: TlsConnector,
}

impl DialConnector {
    pub fn new(dial: Arc<dyn Dial>) -> Self {
        // Install ring as the crypto provider (may already be installed)
        let _ = rustls::crypto::ring::default_provider().install_default();

        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            dial,
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
        }
    }
}

impl Service<Uri> for DialConnector {
    type Response = DialStream;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dial = self.dial.clone();
        let tls_connector = self.tls_connector.clone();

        Box::pin(async move {
            // IPv6 hosts keep their brackets here, which is what `host:port` wants.
            let host = uri.host().ok_or_else(|| Error::NoHost(uri.to_string()))?;

            let is_https = match uri.scheme_str() {
                Some("https") => true,
                Some("http") | None => false,
                Some(other) => {
                    return Err(Error::InvalidUri(format!("unsupported scheme '{}'", other)))
                }
            };
            let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });
            let address = format!("{}:{}", host, port);

            let conn = dial
                .dial_context(&Context::background(), Transport::Tcp, &address)
                .await?;
            log::info!("Connected to {} (TLS: {})", address, is_https);

            if !is_https {
                return Ok(DialStream::new(MaybeTlsStream::Plain(conn)));
            }

            let bare_host = host.trim_start_matches('[').trim_end_matches(']');
            let server_name = rustls::pki_types::ServerName::try_from(bare_host.to_string())
                .map_err(|e| Error::InvalidServerName(e.to_string()))?;

            log::debug!("Starting TLS handshake with {}", bare_host);
            let tls_stream = tls_connector
                .connect(server_name, conn)
                .await
                .map_err(|e| Error::TlsHandshake(e.to_string()))?;

            log::debug!("TLS handshake completed with {}", bare_host);
            Ok(DialStream::new(MaybeTlsStream::Tls(Box::new(tls_stream))))
        })
    }
}

/// A stream that can be either plain or TLS-wrapped.
enum MaybeTlsStream {
    Plain(BoxConn),
    Tls(Box<TlsStream<BoxConn>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connection produced by [`DialConnector`], usable by hyper.
pub struct DialStream {
    io: TokioIo<MaybeTlsStream>,
}

impl DialStream {
    fn new(stream: MaybeTlsStream) -> Self {
        Self {
            io: TokioIo::new(stream),
        }
    }
}

impl Connection for DialStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for DialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Read::poll_read(Pin::new(&mut self.get_mut().io), cx, buf)
    }
}

impl Write for DialStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Write::poll_write(Pin::new(&mut self.get_mut().io), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Write::poll_flush(Pin::new(&mut self.get_mut().io), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Write::poll_shutdown(Pin::new(&mut self.get_mut().io), cx)
    }
}
