//! Error types
//!
//! `HttpError` never crosses the async boundary as a panic. Sessions record it,
//! hand it to the error callback and leave `Response::status` at `-1` (or at
//! the last observed status for redirect failures).

use std::io;

/// Request failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Redirect limit of {limit} exceeded at {location}")]
    RedirectLoopExceeded { limit: u32, location: String },

    #[error("Write callback aborted after {written} bytes")]
    WriteCallbackAborted { written: u64 },

    #[error("Network is offline")]
    OfflineDetected,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation dropped before completion")]
    Abandoned,
}

impl HttpError {
    /// Classify an I/O error raised while talking to a peer.
    ///
    /// Socket timeouts surface as `TimedOut` or `WouldBlock` depending on the
    /// platform; both mean the configured deadline tripped.
    pub(crate) fn from_transfer(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => HttpError::Timeout,
            io::ErrorKind::InvalidData => HttpError::Protocol(format!("{}: {}", context, err)),
            _ => HttpError::ConnectionFailed(format!("{}: {}", context, err)),
        }
    }

    /// True for failures caused by the network rather than the caller.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            HttpError::ConnectionFailed(_)
                | HttpError::Timeout
                | HttpError::OfflineDetected
                | HttpError::Tls(_)
        )
    }
}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        HttpError::Io(err.to_string())
    }
}

/// Settings store failure
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Settings JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(HttpError::from_transfer("read", err), HttpError::Timeout);

        let err = io::Error::new(io::ErrorKind::WouldBlock, "slow");
        assert_eq!(HttpError::from_transfer("read", err), HttpError::Timeout);
    }

    #[test]
    fn test_refused_is_connection_failure() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let classified = HttpError::from_transfer("connect", err);
        assert!(matches!(classified, HttpError::ConnectionFailed(_)));
        assert!(classified.is_network());
    }

    #[test]
    fn test_display() {
        let err = HttpError::RedirectLoopExceeded {
            limit: 3,
            location: "/loop".into(),
        };
        assert_eq!(err.to_string(), "Redirect limit of 3 exceeded at /loop");
        assert!(!err.is_network());
    }
}
