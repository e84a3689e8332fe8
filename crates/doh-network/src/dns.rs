//! DNS-over-HTTPS (DoH) resolver.
//!
//! Hostnames are resolved by sending RFC 8484 `GET` queries to a DoH server
//! that is addressed by a literal IP. The server address has to be literal:
//! resolving it would itself require DNS.
//!
//! The message codec comes from `hickory-proto`; the HTTP exchange goes
//! through an [`HttpClient`] that dials the raw dial primitive. The exchange
//! is behind the [`DnsExchange`] trait so other transports (or test doubles)
//! can be plugged in.

use crate::client::{Body, HttpClient};
use crate::dial::{Context, Transport};
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::uri::Scheme;
use http::Request;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Content type of wire-format DNS messages.
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Path of the DoH endpoint on the server.
const DOH_PATH: &str = "/dns-query";

/// Alias for the `Future` type returned by a [`DnsExchange`].
pub type Exchanging = Pin<Box<dyn Future<Output = Result<Message>> + Send>>;

/// Sends one DNS query message and returns the server's answer.
pub trait DnsExchange: Send + Sync {
    fn exchange(&self, request: Message) -> Exchanging;
}

/// DNS-over-HTTPS exchange against a literal-IP server.
#[derive(Clone)]
pub struct HttpsExchange {
    server: IpAddr,
    scheme: Scheme,
    client: HttpClient,
}

impl HttpsExchange {
    /// `client` should dial the raw primitive; it carries all DoH traffic.
    pub fn new(server: IpAddr, client: HttpClient) -> Self {
        Self {
            server,
            scheme: Scheme::HTTPS,
            client,
        }
    }

    /// Talk to the server over `scheme` instead of `https`, e.g. a plain
    /// `http` endpoint on a local forwarder.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn server(&self) -> IpAddr {
        self.server
    }
}

impl DnsExchange for HttpsExchange {
    fn exchange(&self, request: Message) -> Exchanging {
        let server = self.server;
        let scheme = self.scheme.clone();
        let client = self.client.clone();

        Box::pin(async move {
            let wire = request
                .to_vec()
                .map_err(|e| Error::DnsMessage(format!("cannot encode query: {}", e)))?;
            let uri = query_uri(&scheme, server, &wire);

            let http_request = Request::get(uri.as_str())
                .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
                .body(Body::new(Bytes::new()))
                .map_err(|e| Error::InvalidUri(format!("{}: {}", uri, e)))?;

            let response = client.request(http_request).await?;

            if !response.status().is_success() {
                return Err(Error::DohServerError(response.status().to_string()));
            }

            if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
                let content_type = content_type.to_str().unwrap_or_default();
                if !content_type.starts_with(DNS_MESSAGE_CONTENT_TYPE) {
                    return Err(Error::DohServerError(format!(
                        "unexpected content type '{}'",
                        content_type
                    )));
                }
            }

            log::debug!("Received {} bytes from DoH server {}", response.body().len(), server);

            Message::from_vec(response.body())
                .map_err(|e| Error::DnsMessage(format!("cannot decode response: {}", e)))
        })
    }
}

/// Build the RFC 8484 GET URI for a wire-format query.
fn query_uri(scheme: &Scheme, server: IpAddr, wire: &[u8]) -> String {
    let authority = match server {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{}]", ip),
    };
    format!(
        "{}://{}{}?dns={}",
        scheme,
        authority,
        DOH_PATH,
        URL_SAFE_NO_PAD.encode(wire)
    )
}

/// A DNS-over-HTTPS resolver.
///
/// Cloning is cheap; clones share the same exchange.
///
/// # Example
///
/// ```no_run
/// use doh_network::{Context, DohResolver, HttpClient, TcpDialer, Transport, DNS_TIMEOUT};
/// use std::sync::Arc;
///
/// # async fn example() -> doh_network::Result<()> {
/// let client = HttpClient::new("my-agent/1.0", DNS_TIMEOUT, Arc::new(TcpDialer::new()))?;
/// let resolver = DohResolver::new("9.9.9.9".parse().unwrap(), client);
///
/// let ips = resolver
///     .resolve(&Context::background(), Transport::Tcp, "example.com")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DohResolver {
    exchange: Arc<dyn DnsExchange>,
    class: DNSClass,
}

impl DohResolver {
    /// Create a resolver that queries the DoH server at `server` over `client`.
    pub fn new(server: IpAddr, client: HttpClient) -> Self {
        Self::with_exchange(Arc::new(HttpsExchange::new(server, client)))
    }

    /// Create a resolver on top of an arbitrary exchange.
    pub fn with_exchange(exchange: Arc<dyn DnsExchange>) -> Self {
        Self {
            exchange,
            class: DNSClass::IN,
        }
    }

    /// Use `class` for every query instead of `IN`.
    pub fn with_class(mut self, class: DNSClass) -> Self {
        self.class = class;
        self
    }

    pub fn class(&self) -> DNSClass {
        self.class
    }

    /// Resolve `host` to the addresses usable over `transport`.
    ///
    /// A literal IP is returned as-is without any query. Otherwise A and/or
    /// AAAA queries are issued concurrently (both for [`Transport::Tcp`]); a
    /// failing family is skipped, and the call only fails when neither family
    /// produced an address. IPv4 addresses come first.
    ///
    /// The whole resolution is bounded by `ctx`.
    pub async fn resolve(
        &self,
        ctx: &Context,
        transport: Transport,
        host: &str,
    ) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        log::debug!("Resolving {} via DoH ({})", host, transport);

        let (mut ips, ipv6) = ctx
            .run(async {
                tokio::join!(
                    self.lookup_family(host, RecordType::A, transport.wants_ipv4()),
                    self.lookup_family(host, RecordType::AAAA, transport.wants_ipv6()),
                )
            })
            .await?;
        ips.extend(ipv6);

        if ips.is_empty() {
            return Err(Error::NoAddresses {
                transport,
                host: host.to_string(),
            });
        }

        log::debug!("Resolved {} -> {:?}", host, ips);
        Ok(ips)
    }

    /// Query A records for `host`.
    pub async fn lookup_a(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.lookup(host, RecordType::A).await
    }

    /// Query AAAA records for `host`.
    pub async fn lookup_aaaa(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.lookup(host, RecordType::AAAA).await
    }

    /// Issue a single query and return the addresses of matching answers.
    pub async fn lookup(&self, host: &str, record_type: RecordType) -> Result<Vec<IpAddr>> {
        let request = build_query(host, record_type, self.class)?;
        let response = self.exchange.exchange(request).await?;

        if response.response_code() != ResponseCode::NoError {
            return Err(Error::DnsError(response.response_code().into()));
        }

        let addresses: Vec<IpAddr> = response
            .answers()
            .iter()
            .filter_map(|record| match (record_type, record.data()) {
                (RecordType::A, Some(RData::A(a))) => Some(IpAddr::V4(a.0)),
                (RecordType::AAAA, Some(RData::AAAA(aaaa))) => Some(IpAddr::V6(aaaa.0)),
                _ => None,
            })
            .collect();

        if addresses.is_empty() {
            return Err(Error::DnsNoRecords(host.to_string()));
        }

        Ok(addresses)
    }

    async fn lookup_family(&self, host: &str, record_type: RecordType, wanted: bool) -> Vec<IpAddr> {
        if !wanted {
            return Vec::new();
        }

        match self.lookup(host, record_type).await {
            Ok(ips) => ips,
            Err(e) => {
                log::debug!("{} lookup for {} failed: {}", record_type, host, e);
                Vec::new()
            }
        }
    }
}

/// Build a recursive query for `host` in wire-model form.
fn build_query(host: &str, record_type: RecordType, class: DNSClass) -> Result<Message> {
    let fqdn = if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{}.", host)
    };
    let name = Name::from_str(&fqdn).map_err(|e| Error::InvalidDnsName {
        name: host.to_string(),
        message: e.to_string(),
    })?;

    let mut query = Query::query(name, record_type);
    query.set_query_class(class);

    // GET queries use ID 0 so responses stay cacheable (RFC 8484 4.1).
    let mut message = Message::new();
    message
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(query);

    Ok(message)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dial::{BoxConn, Dial, Dialing};
    use hickory_proto::rr::rdata::{A, AAAA};
    use hickory_proto::rr::Record;
    use http::header::HeaderValue;
    use http::{Response, StatusCode, Uri};
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Canned answers per record type; a missing entry fails the query.
    #[derive(Default)]
    pub(crate) struct FakeExchange {
        answers: HashMap<RecordType, Vec<IpAddr>>,
        rcode: Option<ResponseCode>,
        pub(crate) calls: AtomicUsize,
        pub(crate) requests: Mutex<Vec<Message>>,
    }

    impl FakeExchange {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn answer(mut self, record_type: RecordType, ips: &[&str]) -> Self {
            let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
            self.answers.insert(record_type, ips);
            self
        }

        fn with_rcode(mut self, rcode: ResponseCode) -> Self {
            self.rcode = Some(rcode);
            self
        }

        fn queried_types(&self) -> Vec<RecordType> {
            let mut types: Vec<_> = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.queries()[0].query_type())
                .collect();
            types.sort_by_key(|t| u16::from(*t));
            types
        }
    }

    impl DnsExchange for FakeExchange {
        fn exchange(&self, request: Message) -> Exchanging {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            let query = request.queries()[0].clone();
            let result = match (self.rcode, self.answers.get(&query.query_type())) {
                (Some(rcode), _) => {
                    let mut response = Message::new();
                    response
                        .set_id(request.id())
                        .set_message_type(MessageType::Response)
                        .set_response_code(rcode)
                        .add_query(query);
                    Ok(response)
                }
                (None, Some(ips)) => {
                    let mut response = Message::new();
                    response
                        .set_id(request.id())
                        .set_message_type(MessageType::Response)
                        .add_query(query.clone());
                    for ip in ips {
                        let rdata = match ip {
                            IpAddr::V4(v4) => RData::A(A(*v4)),
                            IpAddr::V6(v6) => RData::AAAA(AAAA(*v6)),
                        };
                        response.add_answer(Record::from_rdata(query.name().clone(), 300, rdata));
                    }
                    Ok(response)
                }
                (None, None) => Err(Error::DohServerError("503 Service Unavailable".into())),
            };

            Box::pin(async move { result })
        }
    }

    fn resolver(exchange: FakeExchange) -> (DohResolver, Arc<FakeExchange>) {
        let exchange = Arc::new(exchange);
        (DohResolver::with_exchange(exchange.clone()), exchange)
    }

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|ip| ip.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_literal_ip_skips_queries() {
        let (resolver, exchange) = resolver(FakeExchange::new());
        let ctx = Context::background();

        for literal in ["203.0.113.7", "2001:db8::7"] {
            for transport in [Transport::Tcp, Transport::Tcp4, Transport::Tcp6] {
                let result = resolver.resolve(&ctx, transport, literal).await.unwrap();
                assert_eq!(result, ips(&[literal]));
            }
        }
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tcp_queries_both_families() {
        let (resolver, exchange) = resolver(
            FakeExchange::new()
                .answer(RecordType::A, &["192.0.2.1", "192.0.2.2"])
                .answer(RecordType::AAAA, &["2001:db8::1"]),
        );

        let result = resolver
            .resolve(&Context::background(), Transport::Tcp, "example.com")
            .await
            .unwrap();

        assert_eq!(result, ips(&["192.0.2.1", "192.0.2.2", "2001:db8::1"]));
        assert_eq!(exchange.queried_types(), vec![RecordType::A, RecordType::AAAA]);
    }

    #[tokio::test]
    async fn test_tcp4_and_tcp6_query_one_family() {
        let (resolver, exchange) = resolver(
            FakeExchange::new()
                .answer(RecordType::A, &["192.0.2.1"])
                .answer(RecordType::AAAA, &["2001:db8::1"]),
        );
        let ctx = Context::background();

        let v4 = resolver.resolve(&ctx, Transport::Tcp4, "example.com").await.unwrap();
        assert_eq!(v4, ips(&["192.0.2.1"]));
        assert_eq!(exchange.queried_types(), vec![RecordType::A]);

        exchange.requests.lock().unwrap().clear();
        let v6 = resolver.resolve(&ctx, Transport::Tcp6, "example.com").await.unwrap();
        assert_eq!(v6, ips(&["2001:db8::1"]));
        assert_eq!(exchange.queried_types(), vec![RecordType::AAAA]);
    }

    #[tokio::test]
    async fn test_partial_success() {
        let (resolver, exchange) =
            resolver(FakeExchange::new().answer(RecordType::AAAA, &["2001:db8::5"]));

        let result = resolver
            .resolve(&Context::background(), Transport::Tcp, "example.com")
            .await
            .unwrap();

        assert_eq!(result, ips(&["2001:db8::5"]));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_families_failed() {
        let (resolver, _) = resolver(FakeExchange::new());

        let err = resolver
            .resolve(&Context::background(), Transport::Tcp, "example.com")
            .await
            .unwrap_err();

        match err {
            Error::NoAddresses { transport, host } => {
                assert_eq!(transport, Transport::Tcp);
                assert_eq!(host, "example.com");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_answers_fail() {
        let (resolver, _) = resolver(
            FakeExchange::new()
                .answer(RecordType::A, &[])
                .answer(RecordType::AAAA, &[]),
        );

        let err = resolver
            .resolve(&Context::background(), Transport::Tcp, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAddresses { .. }));
    }

    #[tokio::test]
    async fn test_lookup_reports_rcode() {
        let (resolver, _) = resolver(
            FakeExchange::new()
                .answer(RecordType::A, &["192.0.2.1"])
                .with_rcode(ResponseCode::NXDomain),
        );

        let err = resolver.lookup_a("missing.example").await.unwrap_err();
        assert!(matches!(err, Error::DnsError(3)));
    }

    #[tokio::test]
    async fn test_lookup_ignores_other_record_types() {
        // AAAA answers to an A query are not A records.
        let (resolver, _) =
            resolver(FakeExchange::new().answer(RecordType::A, &["2001:db8::1"]));

        let err = resolver.lookup_a("example.com").await.unwrap_err();
        assert!(matches!(err, Error::DnsNoRecords(_)));
    }

    #[tokio::test]
    async fn test_query_shape() {
        let (resolver, exchange) =
            resolver(FakeExchange::new().answer(RecordType::AAAA, &["2001:db8::1"]));
        let resolver = resolver.with_class(DNSClass::CH);
        assert_eq!(resolver.class(), DNSClass::CH);

        resolver.lookup_aaaa("example.com").await.unwrap();

        let requests = exchange.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.id(), 0);
        assert!(request.recursion_desired());
        assert_eq!(request.message_type(), MessageType::Query);
        let query = &request.queries()[0];
        assert_eq!(query.name().to_string(), "example.com.");
        assert_eq!(query.query_type(), RecordType::AAAA);
        assert_eq!(query.query_class(), DNSClass::CH);
    }

    #[tokio::test]
    async fn test_resolve_honours_cancelled_context() {
        let (resolver, _) = resolver(FakeExchange::new().answer(RecordType::A, &["192.0.2.1"]));
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let err = resolver
            .resolve(&ctx, Transport::Tcp, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_query_uri() {
        let v4 = query_uri(&Scheme::HTTPS, "9.9.9.9".parse().unwrap(), &[0xab, 0xcd]);
        assert_eq!(v4, "https://9.9.9.9/dns-query?dns=q80");

        let v6 = query_uri(&Scheme::HTTPS, "2620:fe::fe".parse().unwrap(), &[0xab, 0xcd]);
        assert_eq!(v6, "https://[2620:fe::fe]/dns-query?dns=q80");

        let plain = query_uri(&Scheme::HTTP, "127.0.0.1".parse().unwrap(), &[0xab, 0xcd]);
        assert_eq!(plain, "http://127.0.0.1/dns-query?dns=q80");
    }

    #[test]
    fn test_invalid_name() {
        let label = "a".repeat(64);
        let err = build_query(&format!("{}.example.com", label), RecordType::A, DNSClass::IN)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName { .. }));
    }

    /// In-memory DoH server answering every request with a fixed response.
    struct DohServer {
        status: StatusCode,
        content_type: Option<&'static str>,
        body: Bytes,
        seen: Arc<Mutex<Vec<(Uri, Option<HeaderValue>)>>>,
        dialed: Mutex<Vec<String>>,
    }

    impl DohServer {
        fn new(status: StatusCode, content_type: Option<&'static str>, body: Bytes) -> Self {
            Self {
                status,
                content_type,
                body,
                seen: Arc::default(),
                dialed: Mutex::default(),
            }
        }
    }

    impl Dial for DohServer {
        fn dial_context(&self, _ctx: &Context, _transport: Transport, address: &str) -> Dialing {
            self.dialed.lock().unwrap().push(address.to_string());
            let (client, server) = tokio::io::duplex(64 * 1024);
            let status = self.status;
            let content_type = self.content_type;
            let body = self.body.clone();
            let seen = self.seen.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    seen.lock()
                        .unwrap()
                        .push((req.uri().clone(), req.headers().get(ACCEPT).cloned()));

                    let mut response = Response::new(Full::new(body.clone()));
                    *response.status_mut() = status;
                    if let Some(content_type) = content_type {
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                    }
                    async move { Ok::<_, Infallible>(response) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(server), service)
                    .await;
            });

            Box::pin(async move { Ok(Box::new(client) as BoxConn) })
        }
    }

    fn answer_wire(ip: &str) -> Bytes {
        let request = build_query("example.com", RecordType::A, DNSClass::IN).unwrap();
        let query = request.queries()[0].clone();

        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .add_query(query.clone());
        response.add_answer(Record::from_rdata(
            query.name().clone(),
            300,
            RData::A(A(ip.parse().unwrap())),
        ));
        Bytes::from(response.to_vec().unwrap())
    }

    fn plain_exchange(server: Arc<DohServer>) -> HttpsExchange {
        let client = HttpClient::new("agent", Duration::from_secs(5), server).unwrap();
        HttpsExchange::new("192.0.2.53".parse().unwrap(), client).with_scheme(Scheme::HTTP)
    }

    fn a_query() -> Message {
        build_query("example.com", RecordType::A, DNSClass::IN).unwrap()
    }

    #[tokio::test]
    async fn test_https_exchange_round_trip() {
        let server = Arc::new(DohServer::new(
            StatusCode::OK,
            Some("application/dns-message"),
            answer_wire("192.0.2.10"),
        ));
        let exchange = plain_exchange(server.clone());
        assert_eq!(exchange.server(), "192.0.2.53".parse::<IpAddr>().unwrap());

        let resolver = DohResolver::with_exchange(Arc::new(exchange));
        let ips = resolver.lookup_a("example.com").await.unwrap();
        assert_eq!(ips, vec!["192.0.2.10".parse::<IpAddr>().unwrap()]);

        assert_eq!(*server.dialed.lock().unwrap(), vec!["192.0.2.53:80"]);

        let seen = server.seen.lock().unwrap();
        let (uri, accept) = &seen[0];
        assert_eq!(uri.path(), "/dns-query");
        assert_eq!(accept.as_ref().unwrap(), "application/dns-message");

        let encoded = uri.query().unwrap().strip_prefix("dns=").unwrap();
        let query = Message::from_vec(&URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();
        assert_eq!(query.queries()[0].name().to_string(), "example.com.");
        assert_eq!(query.queries()[0].query_type(), RecordType::A);
    }

    #[tokio::test]
    async fn test_https_exchange_accepts_missing_content_type() {
        let server = Arc::new(DohServer::new(StatusCode::OK, None, answer_wire("192.0.2.11")));

        let response = plain_exchange(server).exchange(a_query()).await.unwrap();
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn test_https_exchange_rejects_error_status() {
        let server = Arc::new(DohServer::new(
            StatusCode::SERVICE_UNAVAILABLE,
            Some("application/dns-message"),
            answer_wire("192.0.2.10"),
        ));

        let err = plain_exchange(server).exchange(a_query()).await.unwrap_err();
        match err {
            Error::DohServerError(message) => assert!(message.contains("503")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_https_exchange_rejects_content_type() {
        let server = Arc::new(DohServer::new(
            StatusCode::OK,
            Some("text/html"),
            answer_wire("192.0.2.10"),
        ));

        let err = plain_exchange(server).exchange(a_query()).await.unwrap_err();
        match err {
            Error::DohServerError(message) => assert!(message.contains("text/html")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_https_exchange_rejects_garbage() {
        let server = Arc::new(DohServer::new(
            StatusCode::OK,
            Some("application/dns-message"),
            Bytes::from_static(b"\x00"),
        ));

        let err = plain_exchange(server).exchange(a_query()).await.unwrap_err();
        assert!(matches!(err, Error::DnsMessage(_)));
    }
}
