//! Transport seam types.
//!
//! # Design
//! The pipeline never talks to the network directly. It hands a
//! `TransportRequest` to a [`Transport`] and gets back a `TransportResponse`
//! whose body is still a live stream. Requests borrow their body reader for
//! the duration of one `send`, which lets the body be a pipe fed by a scoped
//! compressor thread.
//!
//! Any `Fn(TransportRequest) -> Result<TransportResponse>` closure is a
//! transport, so tests can answer requests in memory.

use std::fmt;
use std::io::Read;

use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

use crate::error::Result;

/// Request body handed to the transport.
pub struct RequestBody<'a> {
    pub reader: Box<dyn Read + Send + 'a>,
    /// `None` means chunked framing.
    pub length: Option<u64>,
}

impl fmt::Debug for RequestBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").field("length", &self.length).finish()
    }
}

/// One attempt, fully assembled.
#[derive(Debug)]
pub struct TransportRequest<'a> {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody<'a>>,
}

/// A response whose body has not been read yet.
pub struct TransportResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Box<dyn Read>,
    /// The transport already removed the content encoding.
    pub decompressed: bool,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Box<dyn Read>) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers,
            body,
            decompressed: false,
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("decompressed", &self.decompressed)
            .finish()
    }
}

/// Executes single HTTP attempts. Redirects are never followed here.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse>;
}

impl<F> Transport for F
where
    F: Fn(TransportRequest<'_>) -> Result<TransportResponse> + Send + Sync,
{
    fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse> {
        self(request)
    }
}
