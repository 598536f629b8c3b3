//! TLS Layer
//!
//! rustls client streams over an established TCP connection.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, OnceLock};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::tcp::TcpConnection;

/// TLS configuration
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// ALPN protocols. Only HTTP/1.1 is spoken here.
    pub alpn_protocols: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            alpn_protocols: vec!["http/1.1".into()],
        }
    }
}

/// Create the rustls client configuration
fn create_client_config(config: &TlsConfig) -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    // Mozilla's root certificates
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tls_config.alpn_protocols = config.alpn_protocols
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();

    Arc::new(tls_config)
}

/// Client config shared by every session using the default `TlsConfig`
fn shared_client_config() -> Arc<ClientConfig> {
    static SHARED: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    SHARED.get_or_init(|| create_client_config(&TlsConfig::default())).clone()
}

/// TLS stream wrapper over TCP using rustls
pub struct TlsStream {
    stream: StreamOwned<ClientConnection, TcpStream>,
}

impl TlsStream {
    /// Run the handshake on `tcp` with the shared default config
    pub fn connect(tcp: TcpConnection, server_name: &str) -> io::Result<Self> {
        Self::connect_with_config(tcp, server_name, shared_client_config())
    }

    /// Run the handshake with an explicit config
    pub fn connect_with_config(
        tcp: TcpConnection,
        server_name: &str,
        config: Arc<ClientConfig>,
    ) -> io::Result<Self> {
        let name: ServerName<'static> = server_name
            .to_string()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid server name"))?;

        let conn = ClientConnection::new(config, name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let mut stream = StreamOwned::new(conn, tcp.into_inner());

        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock)?;
        }

        tracing::debug!(
            "TLS established with {} ({:?})",
            server_name,
            stream.conn.protocol_version()
        );

        Ok(Self { stream })
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
