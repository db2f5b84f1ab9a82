//! The record produced by one logical call.

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};

use crate::error::Error;
use crate::redirect::is_redirect;
use crate::types::Cookie;

/// Everything known about a call once it finished or failed.
///
/// A record carrying `error` may be only partially populated: fields describe
/// whatever was known when the call stopped.
#[derive(Debug, Clone)]
pub struct Response {
    /// Trace identifier sent as `X-Request-Id`.
    pub id: Option<String>,
    /// URL after normalization, before any redirect.
    pub requested_url: String,
    /// URL of the last attempt.
    pub url: String,
    /// Method of the last attempt.
    pub method: Method,
    pub status: Option<StatusCode>,
    pub status_text: String,
    pub version: Option<Version>,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub transfer_encoding: Vec<String>,
    /// `Content-Encoding` of the response, if any.
    pub compression: Option<String>,
    /// The transport removed the content encoding itself.
    pub uncompressed: bool,
    pub cookies: Vec<Cookie>,
    pub elapsed: Duration,
    /// In-memory body. Empty when the body was written to a file.
    pub body: Bytes,
    pub saved_to: Option<PathBuf>,
    /// Bytes stored by the sink.
    pub body_size: u64,
    pub error: Option<Error>,
    /// The last attempt's URL has the `https` scheme. Taken from the URL, not
    /// from the connection: the transport reports no TLS session details.
    pub secure: bool,
    pub redirected: bool,
    /// Last `Location` header seen, followed or not.
    pub location: Option<String>,
    /// URLs that answered with a followed redirect, in order.
    pub redirects: Vec<String>,
}

impl Response {
    pub(crate) fn started(id: Option<String>, url: &str, method: Method) -> Self {
        Self {
            id,
            requested_url: url.to_string(),
            url: url.to_string(),
            method,
            status: None,
            status_text: String::new(),
            version: None,
            headers: HeaderMap::new(),
            content_length: None,
            transfer_encoding: Vec::new(),
            compression: None,
            uncompressed: false,
            cookies: Vec::new(),
            elapsed: Duration::ZERO,
            body: Bytes::new(),
            saved_to: None,
            body_size: 0,
            error: None,
            secure: false,
            redirected: false,
            location: None,
            redirects: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn len(&self) -> u64 {
        self.body_size
    }

    pub fn is_empty(&self) -> bool {
        self.body_size == 0
    }

    /// First value of `name`, when it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|s| s.is_success())
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_some_and(is_redirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn fresh_record_is_empty_and_unfinished() {
        let record = Response::started(None, "https://example.com/", Method::GET);
        assert!(record.is_empty());
        assert!(!record.is_success());
        assert!(!record.redirected);
        assert_eq!(record.url, record.requested_url);
    }

    #[test]
    fn helpers_read_body_and_headers() {
        let mut record = Response::started(None, "https://example.com/", Method::GET);
        record.status = Some(StatusCode::OK);
        record.body = Bytes::from_static(b"hi \xff");
        record.body_size = 4;
        record
            .headers
            .insert("content-type", HeaderValue::from_static("text/plain"));

        assert!(record.is_success());
        assert_eq!(record.len(), 4);
        assert_eq!(record.text(), "hi \u{fffd}");
        assert_eq!(record.header("Content-Type"), Some("text/plain"));
        assert_eq!(record.header("missing"), None);
    }

    #[test]
    fn error_overrides_success_status() {
        let mut record = Response::started(None, "https://example.com/", Method::GET);
        record.status = Some(StatusCode::FOUND);
        record.error = Some(Error::TooManyRedirects { limit: 1 });
        assert!(record.is_redirect());
        assert!(!record.is_success());
    }
}
