//! TCP Connection Layer
//!
//! Socket connects with per-phase timeouts.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP connection configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read timeout
    pub read_timeout: Option<Duration>,
    /// Write timeout
    pub write_timeout: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }
}

impl TcpConfig {
    /// Same bound for connect, read and write
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            nodelay: true,
        }
    }
}

/// Connected TCP socket
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    remote_addr: SocketAddr,
}

impl TcpConnection {
    /// Resolve `addr` and connect to the first address that answers
    ///
    /// Name resolution is not bounded by `connect_timeout`, and each resolved
    /// address gets the full timeout, so an unreachable host with N addresses
    /// can take N times `connect_timeout` to fail.
    pub fn connect_with_config(addr: &str, config: &TcpConfig) -> io::Result<Self> {
        let mut last_err = None;

        for socket_addr in addr.to_socket_addrs()? {
            match Self::connect_to_addr(socket_addr, config) {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", socket_addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("No address found for {}", addr))
        }))
    }

    /// Connect to a SocketAddr
    pub fn connect_to_addr(addr: SocketAddr, config: &TcpConfig) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)?;

        stream.set_nodelay(config.nodelay)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;

        Ok(Self { stream, remote_addr: addr })
    }

    /// Get remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Take the inner stream (for TLS upgrade)
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Connect-only reachability check. True as soon as one address accepts.
pub fn any_reachable(addrs: &[SocketAddr], timeout: Duration) -> bool {
    addrs.iter().any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(30)));
        assert!(config.nodelay);
    }

    #[test]
    fn test_connect_local() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = TcpConnection::connect_with_config(&addr.to_string(), &TcpConfig::default()).unwrap();
        assert_eq!(conn.remote_addr(), addr);
    }

    #[test]
    fn test_any_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap();
        assert!(any_reachable(&[open], Duration::from_secs(1)));

        drop(listener);
        assert!(!any_reachable(&[], Duration::from_secs(1)));
    }
}
