//! HTTP Session
//!
//! One logical request: URL, headers, timeout, redirect depth and optional
//! body, plus the completion state shared with whoever awaits it. Requests
//! run synchronously (`get`, `get_to_file`, `get_with`) or on the blocking
//! pool (`get_async`, `get_action`).

use std::fmt;
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Waker;
use std::time::Duration;

use crate::action::{self, Action};
use crate::awaiter::{AwaitTarget, HttpAwaiter};
use crate::config::HttpContext;
use crate::http1::{self, Http1Request};
use crate::promise::{ErrorCallback, Promise};
use crate::proxy::ProxyConfig;
use crate::response::{Headers, Response};
use crate::sink::{BodySink, ChunkWriter};
use crate::streaming::{StreamingBody, TransferEncoding};
use crate::tcp::{self, TcpConfig};
use crate::transport::Connection;
use crate::url::HttpUrl;
use crate::HttpError;

/// Body read buffer size
const CHUNK_SIZE: usize = 16 * 1024;

/// Timeout for each connectivity check
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);

/// Well-known anycast resolvers tried by [`HttpSession::is_online`]
fn reachability_addrs() -> [SocketAddr; 3] {
    [
        SocketAddr::from(([1, 1, 1, 1], 443)),
        SocketAddr::from(([8, 8, 8, 8], 443)),
        SocketAddr::from(([223, 5, 5, 5], 443)),
    ]
}

pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send>;
pub type FinishCallback = Box<dyn FnOnce(&str, &Response) + Send>;

/// Callbacks for an asynchronous request
///
/// `on_write` receives body chunks instead of the response buffer.
/// `on_progress` gets (received, total) after every chunk. `on_finish` runs
/// once with an empty message on success or the failure text otherwise,
/// after `on_error`.
#[derive(Default)]
pub struct Callbacks {
    on_write: Option<ChunkWriter>,
    on_progress: Option<ProgressCallback>,
    on_finish: Option<FinishCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_write(mut self, callback: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_write = Some(Box::new(callback));
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(u64, Option<u64>) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_finish(mut self, callback: impl FnOnce(&str, &Response) + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&HttpError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_write", &self.on_write.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created,
    Initialized,
    Connecting,
    Sending,
    Receiving,
    Finished,
    Error,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Initialized,
            2 => SessionState::Connecting,
            3 => SessionState::Sending,
            4 => SessionState::Receiving,
            5 => SessionState::Finished,
            _ => SessionState::Error,
        }
    }
}

/// Completion state of one request, shared with the worker and the awaiter
#[derive(Debug)]
struct SessionShared {
    state: AtomicU8,
    finished: AtomicBool,
    promise: Promise,
    response: Mutex<Option<Arc<Response>>>,
    final_url: Mutex<Option<HttpUrl>>,
    received: AtomicU64,
    /// `u64::MAX` while unknown
    total: AtomicU64,
}

impl SessionShared {
    fn new(state: SessionState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            finished: AtomicBool::new(false),
            promise: Promise::new(),
            response: Mutex::new(None),
            final_url: Mutex::new(None),
            received: AtomicU64::new(0),
            total: AtomicU64::new(u64::MAX),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);
        tracing::trace!("Session {:?} -> {:?}", SessionState::from_u8(previous), state);
    }

    fn set_progress(&self, received: u64, total: Option<u64>) {
        self.received.store(received, Ordering::Release);
        self.total.store(total.unwrap_or(u64::MAX), Ordering::Release);
    }

    fn progress(&self) -> (u64, Option<u64>) {
        let total = self.total.load(Ordering::Acquire);
        (
            self.received.load(Ordering::Acquire),
            (total != u64::MAX).then_some(total),
        )
    }

    fn store(&self, response: Arc<Response>, url: HttpUrl) {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
        *self.final_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url);
    }
}

impl AwaitTarget<Response> for SessionShared {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn suspend(&self, continuation: Option<Waker>) -> bool {
        match continuation {
            Some(waker) => self.promise.register_continuation(&waker),
            None => {
                self.promise.abandon();
                false
            }
        }
    }

    fn result(&self) -> Option<Arc<Response>> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// A single HTTP request with its configuration and completion state
#[derive(Debug)]
pub struct HttpSession {
    url: HttpUrl,
    /// Lowercase names
    headers: Headers,
    timeout: Duration,
    max_redirects: u32,
    user_agent: String,
    proxy: Option<ProxyConfig>,
    check_online: bool,
    post_data: Option<Vec<u8>>,
    shared: Arc<SessionShared>,
}

impl HttpSession {
    /// Session with default settings
    pub fn new(url: HttpUrl) -> Self {
        Self::with_context(url, &HttpContext::default())
    }

    /// Session seeded from `context`
    pub fn with_context(url: HttpUrl, context: &HttpContext) -> Self {
        let mut session = Self {
            url,
            headers: Headers::new(),
            timeout: context.timeout(),
            max_redirects: context.max_redirects,
            user_agent: context.user_agent.clone(),
            proxy: context.proxy.clone(),
            check_online: context.check_online,
            post_data: None,
            shared: Arc::new(SessionShared::new(SessionState::Created)),
        };

        for (name, value) in &context.headers {
            if let Err(err) = session.set_header(name, value) {
                tracing::warn!("Skipping context header: {}", err);
            }
        }

        session.initialize();
        session
    }

    /// Parse `url` and create a session for it
    pub fn open(url: &str) -> Result<Self, HttpError> {
        Ok(Self::new(HttpUrl::parse(url)?))
    }

    fn initialize(&mut self) {
        self.shared = Arc::new(SessionShared::new(SessionState::Initialized));
        if let Some(proxy) = &self.proxy {
            tracing::debug!("Session for {} via proxy {}", self.url, proxy.authority());
        }
    }

    pub fn url(&self) -> &HttpUrl {
        &self.url
    }

    /// Where the last request ended up after redirects
    pub fn effective_url(&self) -> HttpUrl {
        self.shared.final_url.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.url.clone())
    }

    /// Re-point the session. The previous completion state is discarded.
    pub fn set_url(&mut self, url: &str) -> Result<(), HttpError> {
        self.set_url_parsed(HttpUrl::parse(url)?);
        Ok(())
    }

    pub fn set_url_parsed(&mut self, url: HttpUrl) {
        self.url = url;
        self.initialize();
    }

    /// Set a request header. Names are case-insensitive; the last value wins.
    /// Names outside the token set and values carrying CR, LF or NUL are
    /// rejected.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        if !http1::is_valid_header(name, value) {
            return Err(HttpError::Protocol(format!("invalid request header {:?}", name)));
        }
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        Ok(())
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Redirect hops to follow. 0 hands 3xx responses back unchanged.
    pub fn set_redirect(&mut self, max_redirects: u32) {
        self.max_redirects = max_redirects;
    }

    /// Send `data` as a POST body. Redirects other than 307/308 drop it.
    pub fn set_post_data(&mut self, data: impl Into<Vec<u8>>) {
        self.post_data = Some(data.into());
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_proxy(&mut self, proxy: Option<ProxyConfig>) {
        self.proxy = proxy;
        self.initialize();
    }

    /// Run the connectivity check before each request. Failing it ends the
    /// request with `OfflineDetected`.
    pub fn set_check_online(&mut self, check: bool) {
        self.check_online = check;
    }

    pub fn check_online(&self) -> bool {
        self.check_online
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Response of the last finished request
    pub fn response(&self) -> Option<Arc<Response>> {
        self.shared.result()
    }

    /// Failure of the last request, if it failed
    pub fn last_error(&self) -> Option<HttpError> {
        self.shared.promise.error()
    }

    /// Body bytes received so far and the expected total
    pub fn progress(&self) -> (u64, Option<u64>) {
        self.shared.progress()
    }

    /// Fetch into the response buffer
    pub fn get(&mut self) -> Arc<Response> {
        let transfer = self.transfer(BodySink::Buffer, Callbacks::default());
        transfer.run()
    }

    /// Fetch into `path`, creating parent directories. The file is left in
    /// place on failure.
    pub fn get_to_file(&mut self, path: impl AsRef<Path>) -> Arc<Response> {
        let transfer = self.transfer(BodySink::file(path.as_ref()), Callbacks::default());
        transfer.run()
    }

    /// Fetch through `writer`. Returning fewer bytes than offered aborts the
    /// request with [`HttpError::WriteCallbackAborted`].
    pub fn get_with<'a, F>(&mut self, writer: F) -> Arc<Response>
    where
        F: FnMut(&[u8]) -> usize + Send + 'a,
    {
        let transfer = self.transfer(BodySink::Raw(Box::new(writer)), Callbacks::default());
        transfer.run()
    }

    /// Start the request on the blocking pool and return an awaiter bound
    /// to it.
    pub fn get_async(&mut self, callbacks: Callbacks) -> HttpAwaiter {
        let transfer = self.async_transfer(callbacks);
        let target: Arc<dyn AwaitTarget<Response>> = transfer.shared.clone();

        smol::unblock(move || {
            transfer.run();
        })
        .detach();

        HttpAwaiter::new(target)
    }

    /// Start the request as an [`Action`], so continuations can be chained
    /// with `then`. Failures reach `on_error` and the action still completes
    /// with the (unsuccessful) response.
    pub fn get_action(&mut self, callbacks: Callbacks) -> Action<Arc<Response>> {
        let transfer = self.async_transfer(callbacks);
        let (completer, action) = action::pending();

        smol::unblock(move || {
            let shared = transfer.shared.clone();
            let response = transfer.run();
            if let Some(err) = shared.promise.error() {
                completer.report_error(&err);
            }
            completer.complete(response);
        })
        .detach();

        action
    }

    /// Check well-known endpoints for connectivity
    pub fn is_online() -> bool {
        Self::is_online_with(&reachability_addrs(), REACHABILITY_TIMEOUT)
    }

    /// True iff any of `addrs` accepts a TCP connection within `timeout`
    pub fn is_online_with(addrs: &[SocketAddr], timeout: Duration) -> bool {
        let online = tcp::any_reachable(addrs, timeout);
        tracing::debug!("Connectivity check: {}", if online { "online" } else { "offline" });
        online
    }

    fn async_transfer(&mut self, mut callbacks: Callbacks) -> Transfer<'static> {
        let sink = match callbacks.on_write.take() {
            Some(writer) => BodySink::Chunks(writer),
            None => BodySink::Buffer,
        };
        self.transfer(sink, callbacks)
    }

    fn transfer<'a>(&mut self, sink: BodySink<'a>, callbacks: Callbacks) -> Transfer<'a> {
        // Every request gets fresh completion state
        self.initialize();

        Transfer {
            method: if self.post_data.is_some() { "POST" } else { "GET" },
            url: self.url.clone(),
            headers: self.headers.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            max_redirects: self.max_redirects,
            proxy: self.proxy.clone(),
            check_online: self.check_online,
            body: self.post_data.clone(),
            sink,
            callbacks,
            shared: self.shared.clone(),
        }
    }
}

/// One run of the request state machine
struct Transfer<'a> {
    method: &'static str,
    url: HttpUrl,
    headers: Headers,
    user_agent: String,
    timeout: Duration,
    max_redirects: u32,
    proxy: Option<ProxyConfig>,
    check_online: bool,
    body: Option<Vec<u8>>,
    sink: BodySink<'a>,
    callbacks: Callbacks,
    shared: Arc<SessionShared>,
}

impl Transfer<'_> {
    fn run(mut self) -> Arc<Response> {
        let mut response = Response::default();
        let result = self.perform(&mut response);
        self.finish(result, response)
    }

    fn perform(&mut self, response: &mut Response) -> Result<(), HttpError> {
        if self.check_online && !HttpSession::is_online() {
            return Err(HttpError::OfflineDetected);
        }

        let mut redirects = 0;
        loop {
            *response = Response::default();

            let request = self.request();
            request.validate().map_err(HttpError::Protocol)?;

            self.shared.set_state(SessionState::Connecting);
            let config = TcpConfig::with_timeout(self.timeout);
            let mut conn = Connection::open(&self.url, self.proxy.as_ref(), &config)?;

            self.shared.set_state(SessionState::Sending);
            request
                .write_to(&mut conn)
                .map_err(|e| HttpError::from_transfer("send", e))?;

            self.shared.set_state(SessionState::Receiving);
            let mut reader = BufReader::new(conn);
            let head = http1::read_head(&mut reader)
                .map_err(|e| HttpError::from_transfer("read response head", e))?;
            let encoding = head.transfer_encoding(self.method);
            response.apply_head(head);
            tracing::debug!("{} {} -> {} {}", self.method, self.url, response.status, response.reason);

            if self.max_redirects > 0 && response.is_redirect() && !response.location.is_empty() {
                if redirects >= self.max_redirects {
                    return Err(HttpError::RedirectLoopExceeded {
                        limit: self.max_redirects,
                        location: response.location.clone(),
                    });
                }

                let next = self.url.resolve(&response.location)?;
                tracing::info!("Redirect {} -> {}", self.url, next);

                // 307/308 preserve method and body
                if !matches!(response.status, 307 | 308) {
                    self.method = "GET";
                    self.body = None;
                }

                self.url = next;
                redirects += 1;
                self.shared.set_state(SessionState::Initialized);
                continue;
            }

            return self.read_body(&mut reader, encoding, response);
        }
    }

    fn request(&self) -> Http1Request {
        // Plain requests through a proxy carry the absolute URL
        let target = if self.proxy.is_some() && !self.url.is_secure() {
            self.url.build(false)
        } else {
            self.url.object_string()
        };

        let mut request = Http1Request::new(self.method, &target)
            .header("Host", &self.url.host_header());

        let defaults = [
            ("User-Agent", self.user_agent.as_str()),
            ("Accept", "*/*"),
        ];
        for (name, value) in defaults {
            if !self.headers.contains_key(&name.to_ascii_lowercase()) {
                request = request.header(name, value);
            }
        }

        for (name, value) in &self.headers {
            if matches!(name.as_str(), "host" | "connection" | "content-length") {
                continue;
            }
            request = request.header(name, value);
        }

        if !self.url.is_secure() {
            if let Some(auth) = self.proxy.as_ref().and_then(ProxyConfig::authorization) {
                request = request.header("Proxy-Authorization", &auth);
            }
        }

        request = request.header("Connection", "close");

        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        request
    }

    fn read_body<R: BufRead>(
        &mut self,
        reader: &mut R,
        encoding: TransferEncoding,
        response: &mut Response,
    ) -> Result<(), HttpError> {
        let mut body = StreamingBody::new(reader, encoding);
        let total = body.total_bytes();
        self.shared.set_progress(0, total);
        self.sink.begin()?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = body.read_chunk(&mut buf)
                .map_err(|e| HttpError::from_transfer("read body", e))?;
            if n == 0 {
                break;
            }

            let received = body.bytes_read();
            self.sink.write(&buf[..n], &mut response.body, received - n as u64)?;

            self.shared.set_progress(received, total);
            if let Some(progress) = self.callbacks.on_progress.as_mut() {
                progress(received, total);
            }
        }

        self.sink.finish()
    }

    fn finish(mut self, result: Result<(), HttpError>, mut response: Response) -> Arc<Response> {
        let message = match &result {
            Ok(()) => String::new(),
            Err(err) => err.to_string(),
        };

        if let Err(err) = &result {
            if matches!(err, HttpError::RedirectLoopExceeded { .. }) {
                response.body.clear();
            } else {
                response.status = -1;
            }
        }

        let response = Arc::new(response);
        self.shared.store(response.clone(), self.url.clone());

        match result {
            Ok(()) => {
                tracing::info!(
                    "{} {} -> {} ({} bytes)",
                    self.method,
                    self.url,
                    response.status,
                    self.shared.progress().0
                );
                self.shared.set_state(SessionState::Finished);
            }
            Err(err) => {
                tracing::warn!("{} {} failed: {}", self.method, self.url, err);
                self.shared.set_state(SessionState::Error);
                if let Some(callback) = self.callbacks.on_error.take() {
                    callback(&err);
                }
                self.shared.promise.report_error(&err);
            }
        }

        if let Some(callback) = self.callbacks.on_finish.take() {
            callback(&message, &response);
        }

        self.shared.finished.store(true, Ordering::Release);
        self.shared.promise.notify_finished();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_header_names_fold() {
        let mut session = HttpSession::open("http://example.com/").unwrap();
        session.set_header("Accept", "image/*").unwrap();
        session.set_header("ACCEPT", "text/plain").unwrap();
        assert_eq!(session.headers().len(), 1);
        assert_eq!(session.headers().get("accept").map(String::as_str), Some("text/plain"));

        session.clear_headers();
        assert!(session.headers().is_empty());
    }

    #[test]
    fn test_header_injection_rejected() {
        let mut session = HttpSession::open("http://example.com/").unwrap();
        let err = session.set_header("X-Tag", "a\r\nX-Injected: yes").unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
        assert!(session.set_header("Bad Name", "v").is_err());
        assert!(session.headers().is_empty());
    }

    #[test]
    fn test_initial_state() {
        let session = HttpSession::open("example.com/a").unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        assert!(!session.is_finished());
        assert!(session.response().is_none());
        assert_eq!(session.effective_url().build(false), "http://example.com/a");
    }

    #[test]
    fn test_context_headers() {
        let mut context = HttpContext::default();
        context.headers.insert("X-Client".into(), "neobox".into());
        context.max_redirects = 0;

        let session = HttpSession::with_context(HttpUrl::parse("http://a/").unwrap(), &context);
        assert_eq!(session.headers().get("x-client").map(String::as_str), Some("neobox"));
        assert_eq!(session.max_redirects, 0);
    }

    #[test]
    fn test_request_line_and_headers() {
        let mut session = HttpSession::open("http://example.com:8080/a?q=1").unwrap();
        session.set_header("User-Agent", "custom").unwrap();
        let transfer = session.transfer(BodySink::Buffer, Callbacks::default());
        let text = String::from_utf8(transfer.request().serialize()).unwrap();

        assert!(text.starts_with("GET /a?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("user-agent: custom\r\n"));
        assert!(!text.contains("Neobox/"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_proxy_absolute_form() {
        let mut session = HttpSession::open("http://example.com/x").unwrap();
        session.set_proxy(Some(ProxyConfig::new("127.0.0.1", 3128).with_credentials("u", "p")));
        let transfer = session.transfer(BodySink::Buffer, Callbacks::default());
        let text = String::from_utf8(transfer.request().serialize()).unwrap();

        assert!(text.starts_with("GET http://example.com/x HTTP/1.1\r\n"));
        assert!(text.contains("Proxy-Authorization: Basic dTpw\r\n"));
    }

    #[test]
    fn test_post_method() {
        let mut session = HttpSession::open("http://example.com/upload").unwrap();
        session.set_post_data("a=1");
        let transfer = session.transfer(BodySink::Buffer, Callbacks::default());
        let text = String::from_utf8(transfer.request().serialize()).unwrap();

        assert!(text.starts_with("POST /upload HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn test_is_online_with() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap();
        assert!(HttpSession::is_online_with(&[live], Duration::from_secs(1)));

        drop(listener);
        assert!(!HttpSession::is_online_with(&[live], Duration::from_millis(200)));
        assert!(!HttpSession::is_online_with(&[], Duration::from_millis(200)));
    }
}
