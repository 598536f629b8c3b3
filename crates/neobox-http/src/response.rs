//! HTTP Response

use std::collections::BTreeMap;

use crate::http1::ResponseHead;

/// Response headers, names lower-cased
pub type Headers = BTreeMap<String, String>;

/// Outcome of one request
///
/// `status` stays `-1` when no status line was received (connect failure,
/// timeout). After a redirect chain only the last hop is kept; `location`
/// holds that hop's `Location` header when it was a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// e.g. `HTTP/1.1`
    pub version: String,
    pub status: i32,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Redirect location
    pub location: String,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            version: String::new(),
            status: -1,
            reason: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            location: String::new(),
        }
    }
}

impl Response {
    /// Status code, if a status line was received
    pub fn status_code(&self) -> Option<u16> {
        u16::try_from(self.status).ok()
    }

    /// Check if response is successful
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response is a redirect
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Get header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Declared body length
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Get body as text
    pub fn text(&self) -> Option<String> {
        String::from_utf8(self.body.clone()).ok()
    }

    pub(crate) fn apply_head(&mut self, head: ResponseHead) {
        self.version = head.version;
        self.status = i32::from(head.status);
        self.reason = head.reason;
        self.headers = head.headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        self.location = self.header("location").unwrap_or_default().to_string();
    }
}
