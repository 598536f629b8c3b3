//! HTTP/1.1 Framing
//!
//! Request serialization and response head parsing for HTTP/1.1. Bodies are
//! read incrementally by `streaming::StreamingBody`.

use std::io::{self, BufRead, Read, Write};

use crate::streaming::TransferEncoding;

/// Longest status or header line accepted
const MAX_LINE: usize = 64 * 1024;

/// Token characters allowed in a header name
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// True iff `name: value` can be written without breaking the head framing
pub fn is_valid_header(name: &str, value: &str) -> bool {
    is_token(name) && !value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0))
}

/// HTTP/1.1 request
#[derive(Debug, Clone)]
pub struct Http1Request {
    /// HTTP method
    pub method: String,
    /// Request target: origin-form path or absolute-form URL for proxies
    pub target: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<Vec<u8>>,
}

impl Http1Request {
    /// Create a new request
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            target: target.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set body
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Check the target and every header before anything hits the wire
    pub fn validate(&self) -> Result<(), String> {
        if self.target.is_empty() || self.target.bytes().any(|b| b == b' ' || b.is_ascii_control()) {
            return Err(format!("invalid request target {:?}", self.target));
        }

        match self.headers.iter().find(|(name, value)| !is_valid_header(name, value)) {
            Some((name, _)) => Err(format!("invalid request header {:?}", name)),
            None => Ok(()),
        }
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.target).as_bytes());

        for (name, value) in &self.headers {
            buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        if let Some(ref body) = self.body {
            if !self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-length")) {
                buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
            }
        }

        buf.extend_from_slice(b"\r\n");

        if let Some(ref body) = self.body {
            buf.extend_from_slice(body);
        }

        buf
    }

    /// Write to a stream
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.serialize())?;
        writer.flush()
    }
}

/// Status line plus headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// e.g. `HTTP/1.1`
    pub version: String,
    pub status: u16,
    pub reason: String,
    /// Header names as received
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Get header value (case-insensitive, last occurrence wins)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if response is redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Get redirect location
    pub fn redirect_location(&self) -> Option<&str> {
        self.header("location").filter(|v| !v.is_empty())
    }

    /// How the body following this head is delimited
    pub fn transfer_encoding(&self, method: &str) -> TransferEncoding {
        if method.eq_ignore_ascii_case("HEAD") || self.status == 204 || self.status == 304 {
            return TransferEncoding::Empty;
        }

        let chunked = self.header("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return TransferEncoding::Chunked;
        }

        match self.header("content-length").and_then(|v| v.trim().parse().ok()) {
            Some(len) => TransferEncoding::ContentLength(len),
            None => TransferEncoding::UntilClose,
        }
    }
}

/// Read the status line and headers. Interim 1xx responses are skipped.
pub fn read_head<R: BufRead>(reader: &mut R) -> io::Result<ResponseHead> {
    loop {
        let line = read_line(reader)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Connection closed before status line"))?;
        let (version, status, reason) = parse_status_line(&line)?;

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader)?
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Connection closed inside headers"))?;

            if line.is_empty() {
                break;
            }

            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        if (100..200).contains(&status) && status != 101 {
            tracing::trace!("Skipping interim {} response", status);
            continue;
        }

        return Ok(ResponseHead { version, status, reason, headers });
    }
}

/// One CRLF- or LF-terminated line without its terminator. `None` at EOF.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut raw = Vec::new();
    let n = reader.by_ref().take(MAX_LINE as u64).read_until(b'\n', &mut raw)?;

    if n == 0 {
        return Ok(None);
    }
    if !raw.ends_with(b"\n") && n >= MAX_LINE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Header line too long"));
    }

    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }

    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

fn parse_status_line(line: &str) -> io::Result<(String, u16, String)> {
    let mut parts = line.trim_end().splitn(3, ' ');

    let version = parts.next()
        .filter(|v| *v == "HTTP/1.0" || *v == "HTTP/1.1")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid status line: {:?}", line)))?;

    let status = parts.next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Invalid status code"))?;

    let reason = parts.next().unwrap_or("").to_string();

    Ok((version.to_string(), status, reason))
}
