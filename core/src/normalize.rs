//! Target URL validation and scheme defaulting.

use url::Url;

use crate::error::{Error, Result};

pub const SCHEME_HTTP: &str = "http://";
pub const SCHEME_HTTPS: &str = "https://";

/// Canonicalize `raw` against an optional scheme override.
///
/// Surrounding whitespace is trimmed. A colon that is not part of a `://`
/// separator is rejected, so `host:port` strings are never mistaken for a
/// scheme. With an override, any `http://`/`https://` prefix is replaced by
/// the override (a missing `://` suffix is added). Without one, URLs lacking
/// an http(s) scheme get `https://`. The result must parse as a URL.
///
/// Normalizing an already normalized URL returns it unchanged.
pub fn normalize_url(raw: &str, scheme: Option<&str>) -> Result<String> {
    let mut url = raw.trim().to_string();

    if url.contains(':') && !url.contains("://") {
        return Err(Error::MissingSchemeSeparator(url));
    }

    match scheme.map(str::trim).filter(|s| !s.is_empty()) {
        Some(scheme) => {
            let scheme = if scheme.ends_with("://") {
                scheme.to_string()
            } else {
                format!("{scheme}://")
            };
            let stripped = url
                .strip_prefix(SCHEME_HTTP)
                .or_else(|| url.strip_prefix(SCHEME_HTTPS))
                .unwrap_or(&url);
            if !stripped.starts_with(&scheme) {
                url = format!("{scheme}{stripped}");
            }
        }
        None => {
            if !url.starts_with(SCHEME_HTTP) && !url.starts_with(SCHEME_HTTPS) {
                url = format!("{SCHEME_HTTPS}{url}");
            }
        }
    }

    Url::parse(&url).map_err(|source| Error::InvalidUrl {
        url: url.clone(),
        source,
    })?;
    Ok(url)
}
