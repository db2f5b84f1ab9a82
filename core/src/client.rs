//! Reusable client over a shared transport.
//!
//! # Design
//! `Client` holds an immutable base `Options`, a shared transport and an
//! append-only history of response records. Every call starts from a clone of
//! the base options; per-call changes go through a `RequestBuilder` and never
//! reach the base, so concurrent calls on one client cannot see each other's
//! headers or redirect state. The history is guarded by a mutex and also keeps
//! the partially populated records of failed calls.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::Method;
use serde::Serialize;

use crate::compression::{Compression, CustomCodec};
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::options::{IdentifierKind, Options, Settings};
use crate::payload::Payload;
use crate::pipeline;
use crate::response::Response;
use crate::transport::{TransportConfig, UreqTransport};
use crate::types::Cookie;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct Client {
    options: Options,
    transport: Arc<dyn Transport>,
    history: Mutex<Vec<Response>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("history", &self.lock_history().len())
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client with default options over a default `ureq` transport.
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self::with_transport(options, UreqTransport::default())
    }

    pub fn with_transport(options: Options, transport: impl Transport + 'static) -> Self {
        Self {
            options,
            transport: Arc::new(transport),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Build a client from loaded settings and transport parameters.
    pub fn from_settings(settings: Settings, transport: &TransportConfig) -> Result<Self> {
        let options = Options::from_settings(settings)?;
        Ok(Self::with_transport(options, UreqTransport::new(transport)))
    }

    /// The base options every call starts from.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Start a call with per-call overrides.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            url: url.to_string(),
            payload: Payload::Empty,
            options: self.options.clone(),
            error: None,
        }
    }

    /// Run a call with explicit options and record it in the history.
    pub fn execute(&self, method: Method, url: &str, payload: Payload, options: &Options) -> Result<Response> {
        let record = pipeline::run(self.transport.as_ref(), method, url, payload, options)?;
        self.lock_history().push(record.clone());
        match &record.error {
            Some(err) => Err(err.clone()),
            None => Ok(record),
        }
    }

    pub fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::GET, url).send()
    }

    pub fn head(&self, url: &str) -> Result<Response> {
        self.request(Method::HEAD, url).send()
    }

    pub fn options_request(&self, url: &str) -> Result<Response> {
        self.request(Method::OPTIONS, url).send()
    }

    pub fn trace(&self, url: &str) -> Result<Response> {
        self.request(Method::TRACE, url).send()
    }

    pub fn delete(&self, url: &str) -> Result<Response> {
        self.request(Method::DELETE, url).send()
    }

    pub fn connect(&self, url: &str) -> Result<Response> {
        self.request(Method::CONNECT, url).send()
    }

    pub fn post(&self, url: &str, payload: impl Into<Payload>) -> Result<Response> {
        self.request(Method::POST, url).body(payload).send()
    }

    pub fn put(&self, url: &str, payload: impl Into<Payload>) -> Result<Response> {
        self.request(Method::PUT, url).body(payload).send()
    }

    pub fn patch(&self, url: &str, payload: impl Into<Payload>) -> Result<Response> {
        self.request(Method::PATCH, url).body(payload).send()
    }

    /// Any method, including extension methods.
    pub fn custom(&self, method: Method, url: &str, payload: impl Into<Payload>) -> Result<Response> {
        self.request(method, url).body(payload).send()
    }

    pub fn post_form<T: Serialize + ?Sized>(&self, url: &str, form: &T) -> Result<Response> {
        self.request(Method::POST, url).form(form).send()
    }

    pub fn put_form<T: Serialize + ?Sized>(&self, url: &str, form: &T) -> Result<Response> {
        self.request(Method::PUT, url).form(form).send()
    }

    pub fn patch_form<T: Serialize + ?Sized>(&self, url: &str, form: &T) -> Result<Response> {
        self.request(Method::PATCH, url).form(form).send()
    }

    pub fn post_file(&self, url: &str, path: impl AsRef<Path>) -> Result<Response> {
        self.request(Method::POST, url).file(path).send()
    }

    pub fn put_file(&self, url: &str, path: impl AsRef<Path>) -> Result<Response> {
        self.request(Method::PUT, url).file(path).send()
    }

    pub fn patch_file(&self, url: &str, path: impl AsRef<Path>) -> Result<Response> {
        self.request(Method::PATCH, url).file(path).send()
    }

    /// Snapshot of every record produced so far, in completion order.
    pub fn responses(&self) -> Vec<Response> {
        self.lock_history().clone()
    }

    pub fn clear(&self) {
        self.lock_history().clear();
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<Response>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One call being configured on top of the client's base options.
///
/// Setter errors are deferred to [`RequestBuilder::send`].
pub struct RequestBuilder<'c> {
    client: &'c Client,
    method: Method,
    url: String,
    payload: Payload,
    options: Options,
    error: Option<Error>,
}

impl fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("payload", &self.payload)
            .field("options", &self.options)
            .finish()
    }
}

impl<'c> RequestBuilder<'c> {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(err) = self.options.set_header(name, value) {
            self.error.get_or_insert(err);
        }
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.options.add_cookie(cookie);
        self
    }

    pub fn body(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Send `form` as `application/x-www-form-urlencoded`.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.payload = Payload::Text(encoded);
                self.header(CONTENT_TYPE.as_str(), FORM_CONTENT_TYPE)
            }
            Err(err) => {
                self.error.get_or_insert(Error::FormEncoding(err.to_string()));
                self
            }
        }
    }

    /// Upload a file. The content type is guessed from the extension unless
    /// one was already set.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            self.error.get_or_insert(Error::FileNotFound(path.to_path_buf()));
            return self;
        }
        if !self.options.headers.contains_key(CONTENT_TYPE) {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            self = self.header(CONTENT_TYPE.as_str(), mime.essence_str());
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let disposition = format!("form-data; name=\"file\"; filename=\"{filename}\"");
        self.payload = Payload::file(path);
        self.header(CONTENT_DISPOSITION.as_str(), &disposition)
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.options = self.options.compression(compression);
        self
    }

    pub fn custom_compression(mut self, codec: CustomCodec) -> Self {
        self.options = self.options.custom_compression(codec);
        self
    }

    pub fn scheme(mut self, scheme: &str) -> Self {
        self.options = self.options.scheme(scheme);
        self
    }

    pub fn redirects(mut self, follow: bool, preserve_method: bool) -> Self {
        self.options = self.options.redirects(follow, preserve_method);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.options = self.options.max_redirects(max);
        self
    }

    pub fn identifier(mut self, kind: IdentifierKind) -> Self {
        self.options = self.options.identifier(kind);
        self
    }

    pub fn output_file(mut self, path: impl AsRef<Path>) -> Self {
        self.options = self.options.output_file(path.as_ref());
        self
    }

    pub fn on_upload_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.options = self.options.on_upload_progress(callback);
        self
    }

    pub fn on_download_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.options = self.options.on_download_progress(callback);
        self
    }

    /// Replace the per-call options wholesale.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn send(self) -> Result<Response> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.client.execute(self.method, &self.url, self.payload, &self.options)
    }
}
