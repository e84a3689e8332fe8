//! HTTP client that routes through a dialer and stamps a fixed `User-Agent`.

use crate::connector::DialConnector;
use crate::dial::Dial;
use crate::error::{Error, Result};
use bytes::Bytes;
use http::header::{HeaderValue, USER_AGENT};
use http::{Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Request body type accepted by [`HttpClient`].
pub type Body = Full<Bytes>;

/// Default cap on a buffered response body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// An HTTP/1.1 client on top of a [`DialConnector`].
///
/// Every request has its `User-Agent` header replaced with the configured
/// value, whatever the caller set. Each request, including reading the whole
/// response body, must finish within the configured timeout.
///
/// Response bodies are buffered in memory, up to [`DEFAULT_MAX_BODY_SIZE`]
/// unless changed with [`with_max_body_size`](Self::with_max_body_size).
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<DialConnector, Body>,
    user_agent: HeaderValue,
    timeout: Duration,
    max_body_size: usize,
}

impl HttpClient {
    /// Create a client that opens its connections through `dial`.
    pub fn new(user_agent: &str, timeout: Duration, dial: Arc<dyn Dial>) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|_| Error::InvalidUserAgent(user_agent.to_string()))?;

        let client = Client::builder(TokioExecutor::new()).build(DialConnector::new(dial));

        Ok(Self {
            client,
            user_agent,
            timeout,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        })
    }

    /// Fail requests whose response body is larger than `limit` bytes.
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` and collect the full response body.
    pub async fn request(&self, mut request: Request<Body>) -> Result<Response<Bytes>> {
        request
            .headers_mut()
            .insert(USER_AGENT, self.user_agent.clone());
        log::debug!("{} {}", request.method(), request.uri());

        let exchange = async {
            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body = Limited::new(body, self.max_body_size)
                .collect()
                .await
                .map_err(|e| body_error(e, self.max_body_size))?
                .to_bytes();
            Ok::<_, Error>(Response::from_parts(parts, body))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    /// Send a `GET` request to `uri`.
    pub async fn get(&self, uri: &str) -> Result<Response<Bytes>> {
        let request = Request::get(uri)
            .body(Body::new(Bytes::new()))
            .map_err(|e| Error::InvalidUri(format!("{}: {}", uri, e)))?;
        self.request(request).await
    }
}

fn body_error(err: Box<dyn std::error::Error + Send + Sync>, limit: usize) -> Error {
    if err.is::<LengthLimitError>() {
        return Error::BodyTooLarge(limit);
    }
    match err.downcast::<hyper::Error>() {
        Ok(e) => Error::Hyper(*e),
        Err(e) => Error::Io(io::Error::other(e)),
    }
}
