use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        header::{CONTENT_ENCODING, CONTENT_TYPE, LOCATION, SET_COOKIE},
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

const BROTLI_BUFFER: usize = 4096;

/// Shared server state. The loop counter lets tests count redirect hops.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub loop_hits: Arc<AtomicUsize>,
}

/// What `/echo-method` saw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEcho {
    pub method: String,
    pub body: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SizeQuery {
    #[serde(default)]
    pub size: usize,
}

#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    pub to: String,
    #[serde(default = "default_redirect_status")]
    pub status: u16,
}

fn default_redirect_status() -> u16 {
    302
}

#[derive(Debug, Deserialize)]
pub struct CookieQuery {
    pub name: String,
    pub value: String,
}

pub fn app() -> Router {
    app_with_state(AppState::default())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/upload", any(upload))
        .route("/download", get(download))
        .route("/download/{encoding}", get(download_encoded))
        .route("/echo-headers", any(echo_headers))
        .route("/echo-method", any(echo_method))
        .route("/redirect", any(redirect))
        .route("/redirect/missing-location", any(missing_location))
        .route("/loop", any(redirect_loop))
        .route("/loop/hits", get(loop_hits))
        .route("/set-cookie", get(set_cookie))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

/// Deterministic body of `size` bytes.
pub fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Undo a `Content-Encoding`.
pub fn decode(encoding: &str, body: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding.trim().to_ascii_lowercase().as_str() {
        "" | "identity" => out.extend_from_slice(body),
        "gzip" | "x-gzip" => {
            MultiGzDecoder::new(body).read_to_end(&mut out)?;
        }
        "deflate" => {
            ZlibDecoder::new(body).read_to_end(&mut out)?;
        }
        "br" => {
            brotli::Decompressor::new(body, BROTLI_BUFFER).read_to_end(&mut out)?;
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported content encoding {other:?}"),
            ))
        }
    }
    Ok(out)
}

/// Apply a `Content-Encoding`.
pub fn encode(encoding: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    match encoding {
        "gzip" => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        "deflate" => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        "br" => {
            let mut encoder = brotli::CompressorWriter::new(Vec::new(), BROTLI_BUFFER, 5, 22);
            encoder.write_all(data)?;
            Ok(encoder.into_inner())
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported content encoding {other:?}"),
        )),
    }
}

fn bad_encoding(err: io::Error) -> (StatusCode, String) {
    (StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
}

async fn root() -> &'static str {
    "ok"
}

async fn upload(headers: HeaderMap, body: Bytes) -> Result<Response, (StatusCode, String)> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let decoded = decode(encoding, &body).map_err(bad_encoding)?;
    debug!(encoding, received = body.len(), decoded = decoded.len(), "upload");
    Ok(([(CONTENT_TYPE, "application/octet-stream")], decoded).into_response())
}

async fn download(Query(query): Query<SizeQuery>) -> Vec<u8> {
    pattern(query.size)
}

async fn download_encoded(
    Path(encoding): Path<String>,
    Query(query): Query<SizeQuery>,
) -> Result<Response, (StatusCode, String)> {
    let encoded = encode(&encoding, &pattern(query.size)).map_err(bad_encoding)?;
    Ok(([(CONTENT_ENCODING, encoding)], encoded).into_response())
}

async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let mut echoed = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        echoed.insert(name.to_string(), values.join(", "));
    }
    Json(echoed)
}

async fn echo_method(method: Method, headers: HeaderMap, body: Bytes) -> Json<MethodEcho> {
    Json(MethodEcho {
        method: method.to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    })
}

async fn redirect(Query(query): Query<RedirectQuery>, _body: Bytes) -> Response {
    let status = StatusCode::from_u16(query.status)
        .ok()
        .filter(StatusCode::is_redirection)
        .unwrap_or(StatusCode::FOUND);
    (status, [(LOCATION, query.to)]).into_response()
}

async fn missing_location(_body: Bytes) -> StatusCode {
    StatusCode::FOUND
}

async fn redirect_loop(State(state): State<AppState>, _body: Bytes) -> Response {
    let hits = state.loop_hits.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(hits, "redirect loop");
    (StatusCode::FOUND, [(LOCATION, "/loop")]).into_response()
}

async fn loop_hits(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "hits": state.loop_hits.load(Ordering::SeqCst) }))
}

async fn set_cookie(Query(query): Query<CookieQuery>) -> Response {
    let cookie = format!("{}={}; Path=/; HttpOnly", query.name, query.value);
    ([(SET_COOKIE, cookie)], "cookie set").into_response()
}
