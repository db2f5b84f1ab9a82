//! Request execution pipeline.
//!
//! # Design
//! A call runs in two phases. `Call::prepare` does everything that needs no
//! I/O: sink and compressor validation, URL normalization, identifier and
//! header assembly. Any failure there is returned immediately and produces no
//! record. `Call::drive` then runs attempts until a final response arrives,
//! decodes its body into the sink and fills in the record. Failures from this
//! phase are stored on the record as well as returned.
//!
//! Each attempt that carries a payload runs inside `thread::scope`, so the
//! compressor's producer thread never outlives the attempt. The payload is
//! re-opened from its `PayloadSource` for every attempt that sends it, and
//! upload progress keeps counting across those attempts.

use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use http::header::{HeaderName, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, LOCATION, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method};
use tracing::{debug, info, warn};
use url::Url;

use crate::compression::{self, Compression, Compressor};
use crate::error::{Error, Result};
use crate::http::{RequestBody, Transport, TransportRequest, TransportResponse};
use crate::normalize::normalize_url;
use crate::options::{Options, ProgressStage, REQUEST_ID_HEADER};
use crate::payload::{Payload, PayloadSource, PayloadStream};
use crate::progress::{ProgressCounter, ProgressReader};
use crate::redirect::{Decision, RedirectPolicy, RedirectTracker};
use crate::response::Response;
use crate::sink::copy_chunked;
use crate::types::{cookie_header, Cookie};

const DEFAULT_DOWNLOAD_CHUNK: usize = 32 * 1024;

/// Only these methods carry a request payload.
pub fn method_allows_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Run one logical call: every attempt up to the final response.
///
/// On success the populated record is returned. Transfer failures return the
/// error; use [`crate::Client`] to keep the partially populated record.
pub fn execute(
    transport: &dyn Transport,
    method: Method,
    url: &str,
    payload: Payload,
    options: &Options,
) -> Result<Response> {
    let record = run(transport, method, url, payload, options)?;
    match &record.error {
        Some(err) => Err(err.clone()),
        None => Ok(record),
    }
}

/// Like [`execute`], but a failure after validation is reported on the
/// returned record instead of as `Err`.
pub(crate) fn run(
    transport: &dyn Transport,
    method: Method,
    url: &str,
    payload: Payload,
    options: &Options,
) -> Result<Response> {
    let started = Instant::now();
    let call = Call::prepare(method, url, payload, options)?;
    let mut record = Response::started(call.id.clone(), call.url.as_str(), call.method.clone());

    if let Err(err) = call.drive(transport, options, &mut record) {
        warn!(url = %record.url, error = %err, kind = ?err.kind(), "request failed");
        record.error = Some(err);
    }
    record.elapsed = started.elapsed();
    record.redirected = record.url != record.requested_url;
    if record.error.is_none() {
        info!(
            id = record.id.as_deref().unwrap_or("-"),
            method = %record.method,
            url = %record.url,
            status = record.status.map(|s| s.as_u16()),
            size = record.body_size,
            elapsed_ms = record.elapsed.as_millis() as u64,
            "request complete"
        );
    }
    Ok(record)
}

struct Call {
    id: Option<String>,
    method: Method,
    url: Url,
    headers: HeaderMap,
    source: PayloadSource,
    /// Upload bytes sent over every attempt of this call.
    sent: ProgressCounter,
}

impl Call {
    fn prepare(method: Method, raw_url: &str, payload: Payload, options: &Options) -> Result<Self> {
        options.sink.validate()?;

        let payload = if method_allows_body(&method) {
            payload
        } else {
            if !payload.is_empty() {
                debug!(%method, "payload ignored for method without a body");
            }
            Payload::Empty
        };
        payload.check()?;
        if !payload.is_empty()
            && options.compression == Compression::Custom
            && options.custom_codec.compress.is_none()
        {
            return Err(Error::MissingCompressionHook("compressor"));
        }

        let normalized = normalize_url(raw_url, options.scheme.as_deref())?;
        let url = Url::parse(&normalized).map_err(|source| Error::InvalidUrl {
            url: normalized.clone(),
            source,
        })?;
        debug!(raw = raw_url, %url, "url normalized");

        let id = options.identifier.generate();
        let headers = request_headers(options, id.as_deref())?;
        Ok(Self {
            id,
            method,
            url,
            headers,
            source: PayloadSource::new(payload),
            sent: ProgressCounter::new(),
        })
    }

    fn drive(mut self, transport: &dyn Transport, options: &Options, record: &mut Response) -> Result<()> {
        let mut tracker = RedirectTracker::new(RedirectPolicy::from_options(options));
        let mut url = self.url.clone();
        let mut method = self.method.clone();
        let mut send_payload = !self.source.is_empty();

        let response = loop {
            record.url = url.to_string();
            record.method = method.clone();
            record.secure = url.scheme() == "https";

            tracker.dispatched();
            debug!(%method, %url, hop = tracker.count(), state = %tracker.state(), "dispatching");
            let attempt = if send_payload {
                upload(transport, &mut self.source, &self.sent, &method, &url, &self.headers, options)
            } else {
                transport.send(TransportRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers: self.headers.clone(),
                    body: None,
                })
            };
            let response = match attempt {
                Ok(response) => response,
                Err(err) => {
                    tracker.failed();
                    return Err(err);
                }
            };
            record_head(record, &response);

            match tracker.evaluate(&url, &method, response.status, &response.headers)? {
                Decision::Finish => break response,
                Decision::Follow(hop) => {
                    drop(response);
                    record.redirects.push(url.to_string());
                    hop.adjust_headers(&mut self.headers);
                    send_payload = hop.replay_payload && !self.source.is_empty();
                    url = hop.url;
                    method = hop.method;
                }
            }
        };

        download(response, options, &method, record)
    }
}

fn request_headers(options: &Options, id: Option<&str>) -> Result<HeaderMap> {
    let mut headers = options.headers.clone();
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, header_value(USER_AGENT.as_str(), &options.user_agent)?);
    }
    if let Some(cookies) = cookie_header(&options.cookies) {
        let combined = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}; {cookies}"),
            None => cookies,
        };
        headers.insert(COOKIE, header_value(COOKIE.as_str(), &combined)?);
    }
    if let Some(id) = id {
        headers.insert(REQUEST_ID_HEADER, header_value(REQUEST_ID_HEADER, id)?);
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| Error::InvalidHeader {
        name: name.to_string(),
        reason: err.to_string(),
    })
}

/// Send one attempt that carries the payload.
///
/// Upload progress accumulates into `sent`, so a payload replayed after a
/// redirect continues from the previous attempt's count and the total grows
/// by the replayed size.
fn upload(
    transport: &dyn Transport,
    source: &mut PayloadSource,
    sent: &ProgressCounter,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    options: &Options,
) -> Result<TransportResponse> {
    let Some(PayloadStream { reader, size }) = source.open()? else {
        return transport.send(TransportRequest {
            method: method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: None,
        });
    };
    let mut headers = headers.clone();
    let progress = options.on_upload_progress.as_ref();
    let already_sent = sent.get();
    let call_total = |len: Option<u64>| len.map(|n| already_sent + n);

    thread::scope(|scope| -> Result<TransportResponse> {
        let mut reader = reader;
        let mut length = size;
        let mut producer = None;

        if let (Some(callback), ProgressStage::BeforeCompression) = (progress, options.upload_progress_stage) {
            reader = Box::new(ProgressReader::with_counter(
                reader,
                call_total(size),
                Arc::clone(callback),
                sent.clone(),
            ));
        }
        match Compressor::new(options.compression, &options.custom_codec)? {
            Some(compressor) => {
                let (pipe, handle) = compressor.spawn(scope, reader, options.upload_buffer_size);
                reader = Box::new(pipe);
                length = None;
                producer = Some(handle);
                headers.remove(CONTENT_LENGTH);
                if let Some(encoding) = compression::content_encoding(options.compression, &options.custom_codec) {
                    headers.insert(CONTENT_ENCODING, header_value(CONTENT_ENCODING.as_str(), &encoding)?);
                }
            }
            None => {
                if let Some(capacity) = options.upload_buffer_size {
                    reader = Box::new(BufReader::with_capacity(capacity, reader));
                }
            }
        }
        if let (Some(callback), ProgressStage::AfterCompression) = (progress, options.upload_progress_stage) {
            reader = Box::new(ProgressReader::with_counter(
                reader,
                call_total(length),
                Arc::clone(callback),
                sent.clone(),
            ));
        }
        debug!(
            size = ?size,
            length = ?length,
            compression = ?options.compression,
            "sending payload"
        );

        let result = transport.send(TransportRequest {
            method: method.clone(),
            url: url.clone(),
            headers,
            body: Some(RequestBody { reader, length }),
        });
        if let Some(handle) = producer {
            if handle.join().is_err() {
                return Err(io::Error::other("compressor thread panicked").into());
            }
        }
        result
    })
}

/// Copy the response's status line and headers onto the record.
fn record_head(record: &mut Response, response: &TransportResponse) {
    let headers = &response.headers;
    let text = |name: HeaderName| headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok()).map(str::trim);

    record.status = Some(response.status);
    record.status_text = response.status.canonical_reason().unwrap_or_default().to_string();
    record.version = Some(response.version);
    record.content_length = text(CONTENT_LENGTH).and_then(|v| v.parse().ok());
    record.transfer_encoding = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    record.compression = text(CONTENT_ENCODING)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    record.uncompressed = response.decompressed;
    record.cookies = Cookie::from_headers(headers);
    if let Some(location) = text(LOCATION) {
        record.location = Some(location.to_string());
    }
    record.headers = headers.clone();
}

/// Decode the final response body into the configured sink.
fn download(response: TransportResponse, options: &Options, method: &Method, record: &mut Response) -> Result<()> {
    let encoding = match &record.compression {
        Some(encoding) if !response.decompressed => encoding.clone(),
        _ => String::new(),
    };
    let decoding = !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity");
    let mut reader = compression::decoder(response.body, &encoding, &options.custom_codec)?;

    if let Some(callback) = &options.on_download_progress {
        let total = if decoding || *method == Method::HEAD {
            None
        } else {
            record.content_length
        };
        reader = Box::new(ProgressReader::new(reader, total, Arc::clone(callback)));
    }

    let mut sink = options.sink.open()?;
    let chunk = options.download_buffer_size.unwrap_or(DEFAULT_DOWNLOAD_CHUNK);
    let copied = copy_chunked(&mut reader, &mut sink, chunk)?;
    let output = sink.finish()?;
    debug!(copied, stored = output.size, decoded = decoding, "response body drained");

    record.body = output.body;
    record.saved_to = output.path;
    record.body_size = output.size;
    Ok(())
}
