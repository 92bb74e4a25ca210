//! The HTTP request client state machine.
//!
//! [`HttpClient`] performs one request at a time against a configured server
//! endpoint: Idle → Connecting → AwaitingHeader → AwaitingBody →
//! Done(Success | Failure). Terminal states always close the connection and
//! clear the busy flag; a new [`HttpClient::query`] forces any non-idle
//! state back to idle by cancelling the previous request.
//!
//! The client never blocks. All I/O readiness arrives through the
//! [`TransportHandler`] callbacks dispatched by [`HttpClient::execute`],
//! which the owning loop is expected to call regularly; timeouts are
//! wall-clock deadlines checked on each call.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::base::error::HttpError;
use crate::dns::ServerEndpoint;
use crate::http::headers::Headers;
use crate::http::request::{self, Method};
use crate::http::response::{self, ResponseHead};
use crate::transport::{ParseResult, Transport, TransportHandler};

/// Client configuration. Explicit state, no ambient globals: the charset,
/// language and user-agent strings that end up in request headers are all
/// set here.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `User-Agent` header value.
    pub user_agent: String,
    /// `Accept-Charset` header value, also used in the default Content-Type.
    pub accept_charset: String,
    /// `Accept-Language` header value.
    pub accept_language: String,
    /// Port applied when the server spec carries none.
    pub default_port: u16,
    /// Per-request liveness deadline, re-armed on every data arrival.
    pub request_timeout: Duration,
    /// How long to wait for the primary (IPv6) connection before racing the
    /// IPv4 fallback.
    pub happy_eyeballs_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("refnet/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_charset: "UTF-8".to_string(),
            accept_language: "en".to_string(),
            default_port: 80,
            request_timeout: Duration::from_secs(10),
            happy_eyeballs_delay: Duration::from_millis(300),
        }
    }
}

/// Single-request-at-a-time HTTP/1.0 client over an event-driven transport.
pub struct HttpClient<T: Transport> {
    transport: T,
    state: ClientState,
}

/// Everything mutated by the transport callbacks. Kept separate from the
/// transport so `execute` can hand the transport a mutable borrow of this
/// state while the transport dispatches events.
struct ClientState {
    config: ClientConfig,
    endpoint: Option<ServerEndpoint>,

    /// Serialized outbound request; consumed when a connection completes.
    request: Bytes,
    binary: bool,

    busy: bool,
    success: bool,
    connected: bool,
    total_size: usize,
    downloaded_size: usize,
    /// Body offset in the receive buffer; 0 means the header is not parsed.
    data_offset: usize,
    compressed: bool,
    peer: Option<SocketAddr>,
    /// Connect address of the accepted connection, while one is live.
    active_addr: Option<SocketAddr>,

    result_bytes: Bytes,
    result_string: String,
    error: Option<HttpError>,

    request_deadline: Option<Instant>,
    happy_eyeballs_deadline: Option<Instant>,

    notify: Option<Box<dyn FnMut() + Send>>,
    notified: bool,
}

impl<T: Transport> HttpClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            state: ClientState {
                config,
                endpoint: None,
                request: Bytes::new(),
                binary: false,
                busy: false,
                success: false,
                connected: false,
                total_size: 0,
                downloaded_size: 0,
                data_offset: 0,
                compressed: false,
                peer: None,
                active_addr: None,
                result_bytes: Bytes::new(),
                result_string: String::new(),
                error: None,
                request_deadline: None,
                happy_eyeballs_deadline: None,
                notify: None,
                notified: true,
            },
        }
    }

    /// Configures the server from a `host[:port][/path]` spec.
    pub fn set_server(&mut self, spec: &str) -> Result<(), HttpError> {
        let endpoint = ServerEndpoint::resolve(spec, self.state.config.default_port)?;
        self.state.endpoint = Some(endpoint);
        self.state.error = None;
        Ok(())
    }

    /// Configures a pre-resolved endpoint directly.
    pub fn set_endpoint(&mut self, endpoint: ServerEndpoint) {
        self.state.endpoint = Some(endpoint);
        self.state.error = None;
    }

    /// Registers the completion notification, invoked exactly once per query
    /// when it reaches a terminal state (success, failure, disconnect,
    /// timeout or cancellation). It runs on the thread driving [`execute`]
    /// after all result fields are written; to marshal completion onto
    /// another thread, pass a closure that pushes into a channel and inspect
    /// the client from the consumer once it reports not busy.
    ///
    /// [`execute`]: HttpClient::execute
    pub fn set_notify(&mut self, notify: impl FnMut() + Send + 'static) {
        self.state.notify = Some(Box::new(notify));
    }

    /// Starts a request. An in-flight request is cancelled first.
    ///
    /// Mandatory headers are merged over the caller-supplied map
    /// (last-write-wins); only a caller `Content-Type` survives the merge.
    /// Fails without further state changes when no server is configured or
    /// the connection attempt cannot be started.
    pub fn query(
        &mut self,
        method: Method,
        body: &[u8],
        binary: bool,
        headers: Headers,
    ) -> Result<(), HttpError> {
        let Some(endpoint) = self.state.endpoint.clone() else {
            return Err(HttpError::NotConfigured);
        };
        if self.state.busy {
            self.cancel("Cancelled");
        }
        // A completed request leaves `success`, `connected` and the counters
        // behind; the new request must start from idle either way.
        self.state.reset_flight();
        self.state.result_bytes = Bytes::new();
        self.state.result_string.clear();
        self.state.binary = binary;

        let mut headers = headers;
        headers.insert("Host", endpoint.host.clone());
        headers.insert("Accept-Charset", self.state.config.accept_charset.clone());
        headers.insert("Accept-Encoding", "gzip");
        headers.insert("Accept-Language", self.state.config.accept_language.clone());
        headers.insert("Connection", "Close");
        headers.insert("Content-Length", body.len().to_string());
        headers.insert("User-Agent", self.state.config.user_agent.clone());
        if !headers.contains("Content-Type") {
            headers.insert(
                "Content-Type",
                format!("text/plain; encoding={}", self.state.config.accept_charset),
            );
        }
        self.state.request = request::serialize(method, &endpoint.path, &headers, body);

        tracing::debug!(
            method = method.as_str(),
            server = %endpoint.host,
            path = %endpoint.path,
            "starting query"
        );
        self.transport
            .connect(endpoint.addr)
            .map_err(|_| HttpError::Connect)?;

        self.state.happy_eyeballs_deadline = endpoint
            .fallback
            .map(|_| Instant::now() + self.state.config.happy_eyeballs_delay);
        self.state.busy = true;
        self.state.data_offset = 0;
        self.state.notified = false;
        self.state.reset_request_timeout();
        self.state.error = None;
        Ok(())
    }

    /// Poll entry point: checks deadlines, then dispatches transport events.
    pub fn execute(&mut self) {
        if self.state.busy {
            let now = Instant::now();

            if let Some(deadline) = self.state.happy_eyeballs_deadline {
                if now >= deadline && !self.state.connected {
                    self.state.happy_eyeballs_deadline = None;
                    if let Some(fallback) =
                        self.state.endpoint.as_ref().and_then(|e| e.fallback)
                    {
                        tracing::warn!(
                            addr = %fallback,
                            "primary connection slow, racing IPv4 fallback"
                        );
                        if let Err(e) = self.transport.connect(fallback) {
                            tracing::debug!(error = %e, "fallback connection attempt failed");
                        }
                    }
                }
            }

            if let Some(deadline) = self.state.request_deadline {
                if now >= deadline {
                    self.cancel_with(HttpError::Timeout);
                }
            }
        }
        self.transport.poll(&mut self.state);
    }

    /// Cancels any in-flight request, recording `reason` as the error.
    pub fn cancel(&mut self, reason: &str) {
        self.cancel_with(HttpError::Cancelled(reason.to_string()));
    }

    fn cancel_with(&mut self, error: HttpError) {
        // Close every endpoint the request may have opened; closing an
        // address that was never opened is a no-op.
        if let Some(endpoint) = &self.state.endpoint {
            self.transport.close(endpoint.addr);
            if let Some(fallback) = endpoint.fallback {
                self.transport.close(fallback);
            }
        }
        if let Some(peer) = self.state.peer {
            self.transport.close(peer);
        }
        let was_busy = self.state.busy;
        self.state.reset_flight();
        self.state.error = Some(error);
        if was_busy {
            self.state.fire_notify();
        }
    }

    /// Resets result and error state between independent queries. The
    /// configured server endpoint is kept.
    pub fn clear(&mut self) {
        self.state.reset_flight();
        self.state.result_bytes = Bytes::new();
        self.state.result_string.clear();
        self.state.error = None;
    }

    /// Hint for the driving loop: the nearest armed deadline, while busy.
    pub fn next_timeout(&self) -> Option<Duration> {
        if !self.state.busy {
            return None;
        }
        let now = Instant::now();
        [self.state.happy_eyeballs_deadline, self.state.request_deadline]
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy
    }

    pub fn is_success(&self) -> bool {
        self.state.success
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// The error of the last operation, if it did not reach success.
    pub fn error(&self) -> Option<&HttpError> {
        self.state.error.as_ref()
    }

    /// Body bytes received so far (meaningful once the header is parsed).
    pub fn downloaded_size(&self) -> usize {
        self.state.downloaded_size
    }

    /// Declared body size (meaningful once the header is parsed).
    pub fn total_size(&self) -> usize {
        self.state.total_size
    }

    /// Result of a binary-mode query.
    pub fn result_bytes(&self) -> &Bytes {
        &self.state.result_bytes
    }

    /// Result of a text-mode query.
    pub fn result_string(&self) -> &str {
        &self.state.result_string
    }

    /// Configured hostname (port stripped), empty when unset.
    pub fn server(&self) -> &str {
        self.state.endpoint.as_ref().map_or("", |e| e.host.as_str())
    }

    /// Configured request path.
    pub fn request_path(&self) -> &str {
        self.state.endpoint.as_ref().map_or("/", |e| e.path.as_str())
    }

    /// `host/path` display form for logs and error messages.
    pub fn url(&self) -> String {
        format!("{}{}", self.server(), self.request_path())
    }

    /// Access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl ClientState {
    /// Arms the liveness deadline relative to now.
    fn reset_request_timeout(&mut self) {
        self.request_deadline = Some(Instant::now() + self.config.request_timeout);
    }

    /// Resets all in-flight flags and counters to idle.
    fn reset_flight(&mut self) {
        self.busy = false;
        self.success = false;
        self.connected = false;
        self.binary = false;
        self.total_size = 0;
        self.downloaded_size = 0;
        self.data_offset = 0;
        self.compressed = false;
        self.peer = None;
        self.active_addr = None;
        self.request = Bytes::new();
        self.request_deadline = None;
        self.happy_eyeballs_deadline = None;
    }

    /// Invokes the completion notification, at most once per query.
    fn fire_notify(&mut self) {
        if self.notified {
            return;
        }
        self.notified = true;
        if let Some(notify) = self.notify.as_mut() {
            notify();
        }
    }

    /// Terminal failure while parsing: record, notify, close.
    fn fail(&mut self, io: &mut dyn Transport, addr: SocketAddr, error: HttpError) {
        tracing::debug!(error = %error, "request failed");
        self.busy = false;
        self.success = false;
        self.error = Some(error);
        self.fire_notify();
        io.close(addr);
    }
}

impl TransportHandler for ClientState {
    fn on_connected(
        &mut self,
        io: &mut dyn Transport,
        peer: SocketAddr,
        connected: SocketAddr,
    ) -> bool {
        // Only accept the connection we are actually waiting for: completions
        // while idle, the other racing candidate and stray late completions
        // are all rejected.
        let Some(endpoint) = &self.endpoint else {
            return false;
        };
        if !self.busy
            || self.connected
            || (connected != endpoint.addr && Some(connected) != endpoint.fallback)
        {
            return false;
        }
        self.peer = Some(peer);
        self.active_addr = Some(connected);
        let request = std::mem::take(&mut self.request);
        if let Err(e) = io.send(connected, request) {
            // Surfaces at disconnect or timeout; the connection itself is
            // still accepted.
            tracing::debug!(error = %e, "unable to send request");
            self.error = Some(HttpError::Send);
        }
        self.connected = true;
        true
    }

    fn on_disconnected(&mut self, _io: &mut dyn Transport, addr: SocketAddr, reason: &str) {
        // Once a connection is accepted, the abandoned racing candidate may
        // still report a failure; that must not touch the live request.
        if self.connected && Some(addr) != self.active_addr {
            return;
        }
        // No complete response yet and no error recorded: synthesize one.
        if !self.success && self.error.is_none() {
            self.busy = false;
            self.error = Some(HttpError::Disconnect(reason.to_string()));
        }
        self.connected = false;
        self.fire_notify();
    }

    fn on_data(&mut self, io: &mut dyn Transport, addr: SocketAddr, data: &[u8]) -> ParseResult {
        if !self.busy {
            return ParseResult::Consumed(data.len());
        }
        // Liveness, not total-time: every arrival pushes the deadline out.
        self.reset_request_timeout();

        if self.data_offset == 0 {
            match ResponseHead::parse(data) {
                Ok(None) => return ParseResult::NeedMore,
                Ok(Some(head)) => {
                    self.total_size = head.content_length;
                    self.compressed = head.compressed;
                    self.data_offset = head.body_offset;
                }
                Err(error) => {
                    self.fail(io, addr, error);
                    return ParseResult::Consumed(data.len());
                }
            }
        }

        self.downloaded_size = data.len().saturating_sub(self.data_offset);
        if self.total_size > self.downloaded_size {
            return ParseResult::NeedMore;
        }

        let body = &data[self.data_offset..self.data_offset + self.total_size];
        let body = if self.compressed {
            match response::decompress(body) {
                Ok(body) => body,
                Err(error) => {
                    self.fail(io, addr, error);
                    return ParseResult::Consumed(data.len());
                }
            }
        } else {
            body.to_vec()
        };

        if self.binary {
            self.result_bytes = Bytes::from(body);
        } else {
            self.result_string = String::from_utf8_lossy(&body).into_owned();
        }
        self.busy = false;
        self.success = true;
        tracing::debug!(size = self.total_size, "request complete");
        self.fire_notify();
        io.close(addr);
        ParseResult::Consumed(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use bytes::{Buf, BytesMut};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum FakeEvent {
        Connected(SocketAddr),
        Data(SocketAddr, Vec<u8>),
        Closed(SocketAddr, String),
    }

    /// Scripted transport: records operations, replays queued events.
    #[derive(Default)]
    struct FakeTransport {
        connects: Vec<SocketAddr>,
        closed: Vec<SocketAddr>,
        sent: Vec<(SocketAddr, Bytes)>,
        fail_connect: bool,
        events: VecDeque<FakeEvent>,
        bufs: HashMap<SocketAddr, BytesMut>,
    }

    impl FakeTransport {
        fn push(&mut self, event: FakeEvent) {
            self.events.push_back(event);
        }

        fn sent_text(&self) -> String {
            let bytes: Vec<u8> = self
                .sent
                .iter()
                .flat_map(|(_, data)| data.iter().copied())
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl Transport for FakeTransport {
        fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
            if self.fail_connect {
                return Err(TransportError::Io("connection refused".into()));
            }
            self.connects.push(addr);
            Ok(())
        }

        fn send(&mut self, addr: SocketAddr, data: Bytes) -> Result<(), TransportError> {
            self.sent.push((addr, data));
            Ok(())
        }

        fn close(&mut self, addr: SocketAddr) {
            self.closed.push(addr);
            self.bufs.remove(&addr);
        }

        fn poll(&mut self, handler: &mut dyn TransportHandler) {
            while let Some(event) = self.events.pop_front() {
                match event {
                    FakeEvent::Connected(addr) => {
                        if !handler.on_connected(self, addr, addr) {
                            self.close(addr);
                        }
                    }
                    FakeEvent::Data(addr, chunk) => {
                        let mut buf = self.bufs.remove(&addr).unwrap_or_default();
                        buf.extend_from_slice(&chunk);
                        while !buf.is_empty() {
                            match handler.on_data(self, addr, &buf) {
                                ParseResult::NeedMore | ParseResult::Consumed(0) => break,
                                ParseResult::Consumed(n) => buf.advance(n.min(buf.len())),
                            }
                        }
                        self.bufs.insert(addr, buf);
                    }
                    FakeEvent::Closed(addr, reason) => {
                        handler.on_disconnected(self, addr, &reason);
                    }
                }
            }
        }
    }

    fn addr4() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn addr6() -> SocketAddr {
        "[::1]:8080".parse().unwrap()
    }

    fn endpoint4() -> ServerEndpoint {
        ServerEndpoint {
            addr: addr4(),
            fallback: None,
            host: "127.0.0.1".into(),
            path: "/".into(),
        }
    }

    fn client() -> HttpClient<FakeTransport> {
        let mut client = HttpClient::new(FakeTransport::default(), ClientConfig::default());
        client.set_endpoint(endpoint4());
        client
    }

    fn ok_response(body: &[u8], extra_headers: &str) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n",
            body.len(),
            extra_headers
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_query_without_server_fails() {
        let mut client = HttpClient::new(FakeTransport::default(), ClientConfig::default());
        let err = client
            .query(Method::Get, &[], false, Headers::new())
            .unwrap_err();
        assert_eq!(err, HttpError::NotConfigured);
        assert!(!client.is_busy());
    }

    #[test]
    fn test_query_connect_failure() {
        let mut client = client();
        client.transport_mut().fail_connect = true;
        let err = client
            .query(Method::Get, &[], false, Headers::new())
            .unwrap_err();
        assert_eq!(err, HttpError::Connect);
        assert!(!client.is_busy());
    }

    #[test]
    fn test_request_headers_and_split_header_response() {
        let mut client = client();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        client.set_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut headers = Headers::new();
        headers.insert("X-League", "1");
        client.query(Method::Get, &[], false, headers).unwrap();
        assert!(client.is_busy());
        assert_eq!(client.transport_mut().connects, vec![addr4()]);

        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.execute();
        assert!(client.is_connected());

        let request = client.transport_mut().sent_text();
        assert!(request.starts_with("GET / HTTP/1.0\r\n"));
        assert!(request.contains("Host: 127.0.0.1\r\n"));
        assert!(request.contains("Accept-Encoding: gzip\r\n"));
        assert!(request.contains("Connection: Close\r\n"));
        assert!(request.contains("Content-Length: 0\r\n"));
        assert!(request.contains("X-League: 1\r\n"));
        assert!(request.contains("Content-Type: text/plain; encoding=UTF-8\r\n"));

        // Deliver the response split in the middle of the header terminator.
        let response = ok_response(b"hello", "");
        let split = response.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 2;
        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), response[..split].to_vec()));
        client.execute();
        assert!(client.is_busy());
        assert!(!client.is_success());

        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), response[split..].to_vec()));
        client.execute();
        assert!(!client.is_busy());
        assert!(client.is_success());
        assert_eq!(client.result_string(), "hello");
        assert_eq!(client.total_size(), 5);
        assert_eq!(client.downloaded_size(), 5);
        assert!(client.transport_mut().closed.contains(&addr4()));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_caller_content_type_survives_merge() {
        let mut client = client();
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/octet-stream");
        headers.insert("Connection", "keep-alive");
        client.query(Method::Post, b"data", true, headers).unwrap();

        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.execute();
        let request = client.transport_mut().sent_text();
        assert!(request.starts_with("POST / HTTP/1.0\r\n"));
        assert!(request.contains("Content-Type: application/octet-stream\r\n"));
        // Everything else is overridden by the mandatory set.
        assert!(request.contains("Connection: Close\r\n"));
        assert!(request.contains("Content-Length: 4\r\n"));
        assert!(request.ends_with("\r\n\r\ndata"));
    }

    #[test]
    fn test_404_response() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.transport_mut().push(FakeEvent::Data(
            addr4(),
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec(),
        ));
        client.execute();

        assert!(!client.is_busy());
        assert!(!client.is_success());
        let message = client.error().unwrap().to_string();
        assert!(message.contains("404"));
        assert!(message.contains("Not Found"));
        assert!(client.transport_mut().closed.contains(&addr4()));
    }

    #[test]
    fn test_missing_content_length_is_hard_failure() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.transport_mut().push(FakeEvent::Data(
            addr4(),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec(),
        ));
        client.execute();

        assert_eq!(client.error(), Some(&HttpError::MissingContentLength));
        assert!(!client.is_success());
    }

    #[test]
    fn test_gzip_response_decompressed() {
        let mut client = client();
        client.query(Method::Get, &[], true, Headers::new()).unwrap();

        let body = gzip(b"compressed reference listing");
        let response = ok_response(&body, "Content-Encoding: gzip\r\n");
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.transport_mut().push(FakeEvent::Data(addr4(), response));
        client.execute();

        assert!(client.is_success());
        assert_eq!(&client.result_bytes()[..], b"compressed reference listing");
    }

    #[test]
    fn test_corrupt_gzip_is_failure() {
        let mut client = client();
        client.query(Method::Get, &[], true, Headers::new()).unwrap();

        let response = ok_response(b"not really gzip", "Content-Encoding: gzip\r\n");
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.transport_mut().push(FakeEvent::Data(addr4(), response));
        client.execute();

        assert_eq!(client.error(), Some(&HttpError::Decompress));
        assert!(!client.is_success());
    }

    #[test]
    fn test_under_delivered_body_stays_waiting() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.transport_mut().push(FakeEvent::Data(
            addr4(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial".to_vec(),
        ));
        client.execute();

        // Header parsed, body incomplete: nothing consumed, still busy.
        assert!(client.is_busy());
        assert_eq!(client.total_size(), 100);
        assert_eq!(client.downloaded_size(), 7);
        let buffered = client.transport_mut().bufs[&addr4()].len();
        assert_eq!(buffered, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial".len());
    }

    #[test]
    fn test_request_timeout_cancels() {
        let config = ClientConfig {
            request_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut client = HttpClient::new(FakeTransport::default(), config);
        client.set_endpoint(endpoint4());
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        client.set_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.execute();

        assert!(!client.is_busy());
        assert_eq!(client.error(), Some(&HttpError::Timeout));
        assert!(client.transport_mut().closed.contains(&addr4()));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_requery_cancels_in_flight_request() {
        let mut client = client();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        client.set_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        assert!(client.is_busy());

        // Second query while busy: the first is cancelled, then the second
        // starts cleanly.
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        assert!(client.is_busy());
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        assert!(client.transport_mut().closed.contains(&addr4()));
        assert_eq!(client.transport_mut().connects.len(), 2);

        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"ok", "")));
        client.execute();
        assert!(client.is_success());
        assert_eq!(client.result_string(), "ok");
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_records_reason() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.cancel("Cancelled");

        assert!(!client.is_busy());
        assert_eq!(client.error(), Some(&HttpError::Cancelled("Cancelled".into())));
    }

    #[test]
    fn test_happy_eyeballs_fallback_racing() {
        let config = ClientConfig {
            happy_eyeballs_delay: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut client = HttpClient::new(FakeTransport::default(), config);
        client.set_endpoint(ServerEndpoint {
            addr: addr6(),
            fallback: Some(addr4()),
            host: "dual.example.org".into(),
            path: "/".into(),
        });

        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        assert_eq!(client.transport_mut().connects, vec![addr6()]);

        // Deadline already elapsed: the fallback attempt starts without
        // cancelling the primary.
        client.execute();
        assert_eq!(client.transport_mut().connects, vec![addr6(), addr4()]);

        // Fallback wins the race.
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.execute();
        assert!(client.is_connected());

        // The late primary completion is rejected and closed.
        client.transport_mut().push(FakeEvent::Connected(addr6()));
        client.execute();
        assert!(client.transport_mut().closed.contains(&addr6()));

        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"raced", "")));
        client.execute();
        assert!(client.is_success());
        assert_eq!(client.result_string(), "raced");
    }

    #[test]
    fn test_unexpected_disconnect() {
        let mut client = client();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        client.set_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Closed(addr4(), "connection reset".into()));
        client.execute();

        assert!(!client.is_busy());
        assert!(!client.is_connected());
        assert_eq!(
            client.error(),
            Some(&HttpError::Disconnect("connection reset".into()))
        );
        assert!(client
            .error()
            .unwrap()
            .to_string()
            .starts_with("Unexpected disconnect"));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_keeps_server_configuration() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"result", "")));
        client.execute();
        assert_eq!(client.result_string(), "result");

        client.clear();
        assert_eq!(client.result_string(), "");
        assert!(client.error().is_none());
        assert!(!client.is_success());
        assert_eq!(client.server(), "127.0.0.1");
        assert_eq!(client.url(), "127.0.0.1/");

        // Still usable for the next query.
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        assert!(client.is_busy());
    }

    #[test]
    fn test_query_after_success_needs_no_clear() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"first", "")));
        client.execute();
        assert!(client.is_success());

        // The second query must start from idle even though the first ended
        // in success and `clear` was never called.
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        assert!(!client.is_success());
        assert!(!client.is_connected());

        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.execute();
        assert!(client.is_connected());
        assert_eq!(client.transport_mut().sent.len(), 2);

        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"second", "")));
        client.execute();
        assert!(client.is_success());
        assert_eq!(client.result_string(), "second");
    }

    #[test]
    fn test_disconnect_during_second_query_reports_error() {
        let mut client = client();
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Data(addr4(), ok_response(b"first", "")));
        client.execute();
        assert!(client.is_success());

        // A disconnect during the next query must not be masked by the
        // previous success.
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client
            .transport_mut()
            .push(FakeEvent::Closed(addr4(), "connection reset".into()));
        client.execute();

        assert!(!client.is_busy());
        assert_eq!(
            client.error(),
            Some(&HttpError::Disconnect("connection reset".into()))
        );
    }

    #[test]
    fn test_losing_candidate_failure_is_ignored() {
        let config = ClientConfig {
            happy_eyeballs_delay: Duration::ZERO,
            ..ClientConfig::default()
        };
        let mut client = HttpClient::new(FakeTransport::default(), config);
        client.set_endpoint(ServerEndpoint {
            addr: addr6(),
            fallback: Some(addr4()),
            host: "dual.example.org".into(),
            path: "/".into(),
        });

        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        client.execute();
        assert_eq!(client.transport_mut().connects, vec![addr6(), addr4()]);

        // Primary wins the race.
        client.transport_mut().push(FakeEvent::Connected(addr6()));
        client.execute();
        assert!(client.is_connected());

        // The abandoned fallback failing afterwards must not terminate the
        // live request.
        client
            .transport_mut()
            .push(FakeEvent::Closed(addr4(), "connection refused".into()));
        client.execute();
        assert!(client.is_busy());
        assert!(client.is_connected());
        assert!(client.error().is_none());

        client
            .transport_mut()
            .push(FakeEvent::Data(addr6(), ok_response(b"survived", "")));
        client.execute();
        assert!(client.is_success());
        assert_eq!(client.result_string(), "survived");
    }

    #[test]
    fn test_stray_connected_while_idle_is_rejected() {
        let mut client = client();
        client.transport_mut().push(FakeEvent::Connected(addr4()));
        client.execute();

        assert!(!client.is_connected());
        assert!(client.transport_mut().sent.is_empty());
        assert!(client.transport_mut().closed.contains(&addr4()));
    }

    #[test]
    fn test_next_timeout_only_while_busy() {
        let mut client = client();
        assert!(client.next_timeout().is_none());
        client.query(Method::Get, &[], false, Headers::new()).unwrap();
        let timeout = client.next_timeout().unwrap();
        assert!(timeout <= Duration::from_secs(10));
    }
}
