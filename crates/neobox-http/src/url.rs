//! URL Model
//!
//! Scheme, host, port, path and ordered query parameters, plus the
//! percent-encoding codec used for query components.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::HttpError;

/// Query parameters, kept sorted by name
pub type Params = BTreeMap<String, String>;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Parsed HTTP URL
///
/// Fields are only reachable through getters; every setter re-parses the
/// whole URL so the parts never disagree with each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUrl {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    params: Params,
}

impl Default for HttpUrl {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            host: String::new(),
            port: 80,
            path: "/".into(),
            params: Params::new(),
        }
    }
}

/// Default port for a scheme. Like `is_secure`, this only looks at the
/// trailing `s`.
pub fn default_port(scheme: &str) -> u16 {
    if scheme.ends_with('s') { 443 } else { 80 }
}

impl HttpUrl {
    /// Parse a URL string.
    ///
    /// A missing or unknown scheme becomes `http`, a missing port the scheme
    /// default. Query names and values are percent-decoded.
    pub fn parse(text: &str) -> Result<Self, HttpError> {
        let text = text.trim();

        let (scheme, rest) = match text.find("://") {
            Some(i) => (normalize_scheme(&text[..i]), &text[i + 3..]),
            None => ("http".to_string(), text),
        };

        // The fragment never reaches the server
        let rest = match rest.find('#') {
            Some(i) => &rest[..i],
            None => rest,
        };

        let host_end = if rest.starts_with('[') {
            rest.find(']')
                .map(|i| i + 1)
                .ok_or_else(|| HttpError::MalformedUrl(format!("unterminated IPv6 host in {}", text)))?
        } else {
            rest.find([':', '/', '?']).unwrap_or(rest.len())
        };

        let host = &rest[..host_end];
        if host.is_empty() {
            return Err(HttpError::MalformedUrl(format!("missing host in {:?}", text)));
        }

        let mut rest = &rest[host_end..];

        let port = match rest.strip_prefix(':') {
            Some(after) => {
                let end = after.find(['/', '?']).unwrap_or(after.len());
                let digits = &after[..end];
                rest = &after[end..];

                if digits.is_empty() {
                    default_port(&scheme)
                } else {
                    digits.parse::<u16>()
                        .map_err(|_| HttpError::MalformedUrl(format!("invalid port {:?}", digits)))?
                }
            }
            None => default_port(&scheme),
        };

        let (path, query) = match rest.find('?') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: if path.is_empty() { "/".into() } else { path.to_string() },
            params: parse_query(query),
        })
    }

    /// Build a URL from its parts
    pub fn from_parts(host: &str, path: &str, params: Params, scheme: &str, port: u16) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Self {
            scheme: normalize_scheme(scheme),
            host: host.to_string(),
            port,
            path,
            params,
        }
    }

    /// Parse `text` and merge `params` over its query
    pub fn with_params(text: &str, params: Params) -> Result<Self, HttpError> {
        let mut url = Self::parse(text)?;
        url.params.extend(params);
        Ok(url)
    }

    /// Replace the whole URL
    pub fn set_url(&mut self, text: &str) -> Result<(), HttpError> {
        *self = Self::parse(text)?;
        Ok(())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Scheme-suffix check: `https` is secure, `http` is not
    pub fn is_secure(&self) -> bool {
        self.scheme.ends_with('s')
    }

    /// Rebuild the URL text. The port is printed when asked for or when it
    /// differs from the scheme default.
    pub fn build(&self, show_port: bool) -> String {
        let mut out = format!("{}://{}", self.scheme, self.host);
        if show_port || self.port != default_port(&self.scheme) {
            let _ = write!(out, ":{}", self.port);
        }
        out.push_str(&self.object_string());
        out
    }

    /// Request target: path plus encoded query
    ///
    /// Bytes that may not appear in a request line (space, controls,
    /// non-ASCII) are percent-encoded. Existing `%XX` escapes and `/` stay.
    pub fn object_string(&self) -> String {
        let mut out = encode_path(&self.path);

        for (i, (name, value)) in self.params.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(&encode(name));
            out.push('=');
            out.push_str(&encode(value));
        }

        out
    }

    /// Value for the `Host` header
    pub fn host_header(&self) -> String {
        if self.port == default_port(&self.scheme) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` for socket connects and `CONNECT` tunnels
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host without IPv6 brackets, for TLS server names
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Resolve a redirect `Location` against this URL
    pub fn resolve(&self, location: &str) -> Result<HttpUrl, HttpError> {
        let location = location.trim();

        if location.contains("://") {
            return Self::parse(location);
        }

        if let Some(rest) = location.strip_prefix("//") {
            return Self::parse(&format!("{}://{}", self.scheme, rest));
        }

        let base = format!("{}://{}", self.scheme, self.authority());

        if location.starts_with('/') {
            return Self::parse(&format!("{}{}", base, location));
        }

        if location.starts_with('?') {
            return Self::parse(&format!("{}{}{}", base, self.path, location));
        }

        let dir = match self.path.rfind('/') {
            Some(i) => &self.path[..=i],
            None => "/",
        };

        let (relative, query) = match location.find('?') {
            Some(i) => (&location[..i], &location[i..]),
            None => (location, ""),
        };

        let path = remove_dot_segments(&format!("{}{}", dir, relative));
        Self::parse(&format!("{}{}{}", base, path, query))
    }
}

impl fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build(false))
    }
}

impl FromStr for HttpUrl {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn normalize_scheme(scheme: &str) -> String {
    let lower = scheme.trim().to_ascii_lowercase();
    match lower.as_str() {
        "http" | "https" => lower,
        "" => "http".into(),
        other => {
            tracing::warn!("Unsupported scheme {:?}, falling back to http", other);
            "http".into()
        }
    }
}

fn parse_query(query: &str) -> Params {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode(name), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/').skip(1) {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    if (path.ends_with("/.") || path.ends_with("/..")) && !out.ends_with('/') {
        out.push('/');
    }
    out
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());

    for &byte in path.as_bytes() {
        if byte.is_ascii_graphic() && !b"\"<>\\^`{|}#".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(UPPER_HEX[(byte >> 4) as usize] as char);
            out.push(UPPER_HEX[(byte & 0x0F) as usize] as char);
        }
    }

    out
}

/// Percent-encode every byte outside `A-Z a-z 0-9 - . _ ~`
pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for &byte in text.as_bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(UPPER_HEX[(byte >> 4) as usize] as char);
            out.push(UPPER_HEX[(byte & 0x0F) as usize] as char);
        }
    }

    out
}

/// Decode `%XX` sequences. Malformed sequences are kept as written.
pub fn decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (from_hex(bytes[i + 1]), from_hex(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    match String::from_utf8(out) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
