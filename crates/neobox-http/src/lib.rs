//! Neobox HTTP
//!
//! Awaitable HTTP/1.1 client core: URL model, one-shot promises and typed
//! actions, and a request session with redirects, proxies, timeouts and
//! streaming sinks.

pub mod error;
pub mod url;
pub mod promise;
pub mod action;
pub mod awaiter;
pub mod tcp;
pub mod tls;
pub mod http1;
pub mod streaming;
pub mod response;
pub mod proxy;
pub mod settings;
pub mod config;
pub mod transport;
pub mod session;
mod sink;

pub use error::{HttpError, SettingsError};
pub use url::{HttpUrl, Params, encode, decode, default_port};
pub use promise::{Promise, ErrorCallback};
pub use action::{Action, Completer, ActionAwaiter, pending};
pub use awaiter::{AwaitTarget, HttpAwaiter};
pub use tcp::{TcpConnection, TcpConfig};
pub use tls::{TlsStream, TlsConfig};
pub use http1::{Http1Request, ResponseHead};
pub use streaming::{StreamingBody, StreamState, TransferEncoding};
pub use response::{Response, Headers};
pub use proxy::ProxyConfig;
pub use settings::Settings;
pub use config::HttpContext;
pub use session::{HttpSession, Callbacks, SessionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
