//! Connections
//!
//! The owned plain or TLS connection used by one request attempt, opened
//! directly or through an HTTP proxy. Dropping it closes the socket, so
//! every exit path (redirect retry, timeout, error) releases it.

use std::io::{self, BufReader, Read, Write};

use crate::http1::{self, Http1Request};
use crate::proxy::ProxyConfig;
use crate::tcp::{TcpConfig, TcpConnection};
use crate::tls::TlsStream;
use crate::url::HttpUrl;
use crate::HttpError;

/// Plain or TLS connection
pub enum Connection {
    Plain(TcpConnection),
    Tls(Box<TlsStream>),
}

impl Connection {
    /// Connect to `url`, through `proxy` when given
    pub fn open(url: &HttpUrl, proxy: Option<&ProxyConfig>, config: &TcpConfig) -> Result<Self, HttpError> {
        let target = match proxy {
            Some(proxy) => proxy.authority(),
            None => url.authority(),
        };

        let tcp = TcpConnection::connect_with_config(&target, config)
            .map_err(|e| HttpError::from_transfer(&format!("connect {}", target), e))?;

        if !url.is_secure() {
            return Ok(Connection::Plain(tcp));
        }

        let tcp = match proxy {
            Some(proxy) => tunnel(tcp, url, proxy)?,
            None => tcp,
        };

        let tls = TlsStream::connect(tcp, url.server_name()).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => HttpError::Timeout,
            _ => HttpError::Tls(format!("{}: {}", url.host(), e)),
        })?;

        Ok(Connection::Tls(Box::new(tls)))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Connection::Tls(_))
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(tcp) => tcp.read(buf),
            Connection::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(tcp) => tcp.write(buf),
            Connection::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(tcp) => tcp.flush(),
            Connection::Tls(tls) => tls.flush(),
        }
    }
}

/// Open a `CONNECT` tunnel to `url` through the proxy
fn tunnel(mut tcp: TcpConnection, url: &HttpUrl, proxy: &ProxyConfig) -> Result<TcpConnection, HttpError> {
    let authority = url.authority();

    let mut request = Http1Request::new("CONNECT", &authority).header("Host", &authority);
    if let Some(auth) = proxy.authorization() {
        request = request.header("Proxy-Authorization", &auth);
    }

    request.validate().map_err(HttpError::Protocol)?;
    request.write_to(&mut tcp)
        .map_err(|e| HttpError::from_transfer("proxy CONNECT", e))?;

    // One byte at a time so no TLS bytes end up in a discarded buffer
    let head = http1::read_head(&mut BufReader::with_capacity(1, &mut tcp))
        .map_err(|e| HttpError::from_transfer("proxy CONNECT reply", e))?;

    if !(200..300).contains(&head.status) {
        return Err(HttpError::ConnectionFailed(format!(
            "proxy {} refused tunnel to {}: {} {}",
            proxy.authority(),
            authority,
            head.status,
            head.reason
        )));
    }

    tracing::debug!("Tunnel to {} via {}", authority, proxy.authority());
    Ok(tcp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_plain_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = HttpUrl::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

        let conn = Connection::open(&url, None, &TcpConfig::default()).unwrap();
        assert!(!conn.is_tls());
    }

    #[test]
    fn test_refused_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut stream = stream;
            stream.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").unwrap();
            line
        });

        let url = HttpUrl::parse("https://example.com/").unwrap();
        let proxy = ProxyConfig::new("127.0.0.1", port);
        let err = match Connection::open(&url, Some(&proxy), &TcpConfig::default()) {
            Ok(_) => panic!("tunnel should be refused"),
            Err(err) => err,
        };

        assert!(matches!(err, HttpError::ConnectionFailed(ref msg) if msg.contains("407")));
        assert_eq!(server.join().unwrap(), "CONNECT example.com:443 HTTP/1.1\r\n");
    }

    #[test]
    fn test_tunnel_then_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);

            let mut head = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push(line);
            }
            writer.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").unwrap();

            // First byte through the tunnel is the TLS handshake record type
            let mut record = [0u8; 1];
            reader.read_exact(&mut record).unwrap();
            writer.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
            (head, record[0])
        });

        let url = HttpUrl::parse("https://example.com/").unwrap();
        let proxy = ProxyConfig::new("127.0.0.1", port);
        let err = match Connection::open(&url, Some(&proxy), &TcpConfig::with_timeout(Duration::from_secs(5))) {
            Ok(_) => panic!("server does not speak TLS"),
            Err(err) => err,
        };

        let (head, record) = server.join().unwrap();
        assert_eq!(head[0], "CONNECT example.com:443 HTTP/1.1\r\n");
        assert!(head.contains(&"Host: example.com:443\r\n".to_string()));
        assert_eq!(record, 0x16);
        assert!(matches!(err, HttpError::Tls(ref msg) if msg.starts_with("example.com")), "{:?}", err);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = HttpUrl::parse(&format!("http://{}/", addr)).unwrap();
        let err = match Connection::open(&url, None, &TcpConfig::with_timeout(Duration::from_secs(2))) {
            Ok(_) => panic!("nothing listens there"),
            Err(err) => err,
        };
        assert!(matches!(err, HttpError::ConnectionFailed(_)));
    }
}
