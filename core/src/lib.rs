//! Synchronous HTTP client with streaming compression, progress reporting and
//! manual redirect handling.
//!
//! # Overview
//! A call turns `(method, url, payload, options)` into a [`Response`]. The
//! URL is normalized, the payload is streamed (optionally through a
//! compressor and a progress counter) to a [`Transport`], redirects are
//! followed under the configured policy, and the final body is decoded into
//! memory or a file.
//!
//! # Design
//! - The network sits behind the [`Transport`] trait. [`UreqTransport`] is
//!   the default; tests answer requests with closures.
//! - Payloads are re-creatable descriptors, so a redirect that preserves the
//!   method can send them again.
//! - [`Client`] keeps a base [`Options`] and clones it per call, which keeps
//!   concurrent calls isolated.
//! - Failures carry an [`ErrorKind`] so callers can tell configuration
//!   mistakes from transport trouble.

pub mod client;
pub mod compression;
pub mod error;
pub mod http;
pub mod normalize;
pub mod options;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub mod redirect;
pub mod response;
pub mod sink;
pub mod transport;
pub mod types;

pub use client::{Client, RequestBuilder};
pub use compression::{Compression, CustomCodec};
pub use error::{Error, ErrorKind, Result};
pub use crate::http::{Transport, TransportRequest, TransportResponse};
pub use normalize::normalize_url;
pub use options::{IdentifierKind, Options, ProgressStage, Settings};
pub use payload::Payload;
pub use pipeline::execute;
pub use response::Response;
pub use sink::{SinkConfig, SinkKind};
pub use transport::{TransportConfig, UreqTransport};
pub use types::Cookie;
