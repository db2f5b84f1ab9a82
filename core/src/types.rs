//! Plain data types shared by requests and responses.

use http::header::SET_COOKIE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// A cookie sent with a request or received in a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            secure: false,
            http_only: false,
        }
    }

    /// Parse one `Set-Cookie` header value. Unknown attributes are ignored.
    pub fn parse_set_cookie(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));
        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attr.trim(), None),
            };
            match key.to_ascii_lowercase().as_str() {
                "path" => cookie.path = val.map(str::to_string),
                "domain" => cookie.domain = val.map(str::to_string),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
        Some(cookie)
    }

    /// All cookies set by a response's headers, in header order.
    pub fn from_headers(headers: &HeaderMap) -> Vec<Cookie> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(Cookie::parse_set_cookie)
            .collect()
    }
}

/// Render cookies as a single `Cookie` request header value.
pub(crate) fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let pairs: Vec<String> = cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    Some(pairs.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn parses_set_cookie_attributes() {
        let cookie =
            Cookie::parse_set_cookie("session=abc123; Path=/; Domain=example.com; Secure; HttpOnly")
                .unwrap();
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn rejects_set_cookie_without_pair() {
        assert!(Cookie::parse_set_cookie("garbage").is_none());
        assert!(Cookie::parse_set_cookie("=value").is_none());
    }

    #[test]
    fn collects_every_set_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; Path=/x"));
        let cookies = Cookie::from_headers(&headers);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[1].path.as_deref(), Some("/x"));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = vec![Cookie::new("a", "1"), Cookie::new("b", "2")];
        assert_eq!(cookie_header(&cookies).as_deref(), Some("a=1; b=2"));
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn cookie_roundtrips_through_json() {
        let cookie: Cookie = serde_json::from_str(r#"{"name":"k","value":"v"}"#).unwrap();
        assert_eq!(cookie, Cookie::new("k", "v"));
    }
}
