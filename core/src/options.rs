//! Per-call request configuration.
//!
//! # Design
//! `Options` is plain data with value semantics. A reusable client keeps one
//! base `Options` and clones it for every call, so per-call headers, cookies
//! and the redirect counter never leak between calls. The redirect counter is
//! not stored here at all; it lives in the state of a single call.
//!
//! `Settings` is the serializable subset, for loading configuration from
//! JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compression::{Compression, CustomCodec};
use crate::error::{Error, Result};
use crate::progress::ProgressFn;
use crate::sink::{SinkConfig, SinkKind};
use crate::types::Cookie;

pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const RANDOM_ID_LEN: usize = 15;

/// How the per-call trace identifier is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    None,
    /// Random UUID (v4).
    Uuid,
    /// Time-sortable UUID (v7).
    #[default]
    TimeOrdered,
    /// 15 random alphanumeric characters.
    Random,
}

impl IdentifierKind {
    pub fn generate(&self) -> Option<String> {
        match self {
            IdentifierKind::None => None,
            IdentifierKind::Uuid => Some(Uuid::new_v4().to_string()),
            IdentifierKind::TimeOrdered => Some(Uuid::now_v7().to_string()),
            IdentifierKind::Random => Some(
                rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(RANDOM_ID_LEN)
                    .map(char::from)
                    .collect(),
            ),
        }
    }
}

/// Whether upload progress counts payload bytes or wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Count bytes of the original payload.
    #[default]
    BeforeCompression,
    /// Count bytes handed to the transport.
    AfterCompression,
}

/// Configuration for one request.
#[derive(Clone)]
pub struct Options {
    pub headers: HeaderMap,
    pub cookies: Vec<Cookie>,
    /// Scheme forced onto the target URL, e.g. `http`.
    pub scheme: Option<String>,
    pub compression: Compression,
    pub custom_codec: CustomCodec,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub preserve_method_on_redirect: bool,
    /// Requests dispatched in one call may not reach this many redirect
    /// responses; see [`crate::redirect`].
    pub max_redirects: u32,
    pub identifier: IdentifierKind,
    pub sink: SinkConfig,
    pub upload_buffer_size: Option<usize>,
    pub download_buffer_size: Option<usize>,
    pub upload_progress_stage: ProgressStage,
    pub on_upload_progress: Option<ProgressFn>,
    pub on_download_progress: Option<ProgressFn>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            scheme: None,
            compression: Compression::None,
            custom_codec: CustomCodec::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: false,
            preserve_method_on_redirect: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            identifier: IdentifierKind::default(),
            sink: SinkConfig::default(),
            upload_buffer_size: None,
            download_buffer_size: None,
            upload_progress_stage: ProgressStage::default(),
            on_upload_progress: None,
            on_download_progress: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("scheme", &self.scheme)
            .field("compression", &self.compression)
            .field("custom_codec", &self.custom_codec)
            .field("user_agent", &self.user_agent)
            .field("follow_redirects", &self.follow_redirects)
            .field("preserve_method_on_redirect", &self.preserve_method_on_redirect)
            .field("max_redirects", &self.max_redirects)
            .field("identifier", &self.identifier)
            .field("sink", &self.sink)
            .field("upload_buffer_size", &self.upload_buffer_size)
            .field("download_buffer_size", &self.download_buffer_size)
            .field("upload_progress_stage", &self.upload_progress_stage)
            .field("on_upload_progress", &self.on_upload_progress.is_some())
            .field("on_download_progress", &self.on_download_progress.is_some())
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous values for the name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    /// Add a cookie, replacing one with the same name.
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.add_cookie(cookie);
        self
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        let scheme = scheme.into();
        self.scheme = if scheme.is_empty() {
            None
        } else if scheme.ends_with("://") {
            Some(scheme)
        } else {
            Some(format!("{scheme}://"))
        };
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Use caller-supplied compression hooks.
    pub fn custom_compression(mut self, codec: CustomCodec) -> Self {
        self.compression = Compression::Custom;
        self.custom_codec = codec;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn redirects(mut self, follow: bool, preserve_method: bool) -> Self {
        self.follow_redirects = follow;
        self.preserve_method_on_redirect = preserve_method;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn identifier(mut self, kind: IdentifierKind) -> Self {
        self.identifier = kind;
        self
    }

    /// Stream the response body into `path` instead of memory.
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = SinkConfig::file(path);
        self
    }

    pub fn output_buffer(mut self) -> Self {
        self.sink = SinkConfig::buffer();
        self
    }

    /// Ignored unless positive.
    pub fn upload_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.upload_buffer_size = Some(size);
        }
        self
    }

    /// Ignored unless positive.
    pub fn download_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.download_buffer_size = Some(size);
        }
        self
    }

    pub fn on_upload_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.on_upload_progress = Some(std::sync::Arc::new(callback));
        self
    }

    pub fn on_download_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.on_download_progress = Some(std::sync::Arc::new(callback));
        self
    }

    pub fn upload_progress_stage(mut self, stage: ProgressStage) -> Self {
        self.upload_progress_stage = stage;
        self
    }

    /// Build options from loaded settings. Header names and values and the
    /// sink selection are validated here.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let mut options = Options::default()
            .compression(settings.compression)
            .redirects(settings.follow_redirects, settings.preserve_method_on_redirect)
            .max_redirects(settings.max_redirects)
            .identifier(settings.identifier)
            .upload_progress_stage(settings.upload_progress_stage);
        if let Some(scheme) = settings.scheme {
            options = options.scheme(scheme);
        }
        if let Some(user_agent) = settings.user_agent {
            options = options.user_agent(user_agent);
        }
        if let Some(size) = settings.upload_buffer_size {
            options = options.upload_buffer_size(size);
        }
        if let Some(size) = settings.download_buffer_size {
            options = options.download_buffer_size(size);
        }
        for (name, value) in &settings.headers {
            options.set_header(name, value)?;
        }
        options.cookies = settings.cookies;
        options.sink = SinkConfig::new(settings.output, settings.output_path)?;
        Ok(options)
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::InvalidHeader {
        name: name.to_string(),
        reason: err.to_string(),
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|err| Error::InvalidHeader {
        name: name.to_string(),
        reason: err.to_string(),
    })?;
    Ok((header_name, header_value))
}

/// Serializable configuration, e.g. read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheme: Option<String>,
    pub compression: Compression,
    pub user_agent: Option<String>,
    pub follow_redirects: bool,
    pub preserve_method_on_redirect: bool,
    pub max_redirects: u32,
    pub identifier: IdentifierKind,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<Cookie>,
    pub output: SinkKind,
    pub output_path: Option<PathBuf>,
    pub upload_buffer_size: Option<usize>,
    pub download_buffer_size: Option<usize>,
    pub upload_progress_stage: ProgressStage,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheme: None,
            compression: Compression::None,
            user_agent: None,
            follow_redirects: false,
            preserve_method_on_redirect: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            identifier: IdentifierKind::default(),
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            output: SinkKind::Buffer,
            output_path: None,
            upload_buffer_size: None,
            download_buffer_size: None,
            upload_progress_stage: ProgressStage::default(),
        }
    }
}

impl Settings {
    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
