use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, app_with_state, encode, pattern, AppState, MethodEcho};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

// --- upload ---

#[tokio::test]
async fn upload_echoes_plain_body() {
    let resp = app()
        .oneshot(request("POST", "/upload", b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"hello");
}

#[tokio::test]
async fn upload_decodes_each_encoding() {
    let data = pattern(20_000);
    for encoding in ["gzip", "deflate", "br"] {
        let req = Request::builder()
            .method("PUT")
            .uri("/upload")
            .header(http::header::CONTENT_ENCODING, encoding)
            .body(Body::from(encode(encoding, &data).unwrap()))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{encoding}");
        assert_eq!(body_bytes(resp).await.to_vec(), data, "{encoding}");
    }
}

#[tokio::test]
async fn upload_rejects_unknown_encoding() {
    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(http::header::CONTENT_ENCODING, "zstd")
        .body(Body::from("x"))
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn upload_accepts_bodies_over_default_limit() {
    let data = vec![7u8; 3 * 1024 * 1024];
    let resp = app()
        .oneshot(request("POST", "/upload", data.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.len(), data.len());
}

// --- download ---

#[tokio::test]
async fn download_returns_requested_size() {
    let resp = app()
        .oneshot(request("GET", "/download?size=1000", Body::empty()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.to_vec(), pattern(1000));
}

#[tokio::test]
async fn download_gzip_sets_content_encoding() {
    let resp = app()
        .oneshot(request("GET", "/download/gzip?size=5000", Body::empty()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_ENCODING], "gzip");
    let body = body_bytes(resp).await;
    assert_eq!(mock_server::decode("gzip", &body).unwrap(), pattern(5000));
}

#[tokio::test]
async fn download_unknown_encoding_is_415() {
    let resp = app()
        .oneshot(request("GET", "/download/zstd?size=10", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

// --- echo ---

#[tokio::test]
async fn echo_headers_returns_request_headers() {
    let req = Request::builder()
        .uri("/echo-headers")
        .header("x-one", "1")
        .header("cookie", "a=b")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    let echoed: BTreeMap<String, String> = body_json(resp).await;
    assert_eq!(echoed["x-one"], "1");
    assert_eq!(echoed["cookie"], "a=b");
}

#[tokio::test]
async fn echo_method_reports_method_and_body() {
    let req = Request::builder()
        .method("PATCH")
        .uri("/echo-method")
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from("payload"))
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    let echo: MethodEcho = body_json(resp).await;
    assert_eq!(
        echo,
        MethodEcho {
            method: "PATCH".to_string(),
            body: "payload".to_string(),
            content_type: Some("text/plain".to_string()),
        }
    );
}

// --- redirects ---

#[tokio::test]
async fn redirect_uses_requested_status() {
    let resp = app()
        .oneshot(request("POST", "/redirect?to=/echo-method&status=307", "body"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()[http::header::LOCATION], "/echo-method");
}

#[tokio::test]
async fn redirect_falls_back_to_found() {
    let resp = app()
        .oneshot(request("GET", "/redirect?to=/x&status=200", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn missing_location_has_no_location_header() {
    let resp = app()
        .oneshot(request("GET", "/redirect/missing-location", Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(resp.headers().get(http::header::LOCATION).is_none());
}

#[tokio::test]
async fn loop_counts_hits() {
    use tower::Service;

    let state = AppState::default();
    let mut app = app_with_state(state.clone()).into_service();

    for _ in 0..3 {
        let resp = ServiceExt::ready(&mut app)
            .await
            .unwrap()
            .call(request("GET", "/loop", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[http::header::LOCATION], "/loop");
    }

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(request("GET", "/loop/hits", Body::empty()))
        .await
        .unwrap();
    let hits: serde_json::Value = body_json(resp).await;
    assert_eq!(hits["hits"], 3);
    assert_eq!(state.loop_hits.load(Ordering::SeqCst), 3);
}

// --- cookies ---

#[tokio::test]
async fn set_cookie_sends_header() {
    let resp = app()
        .oneshot(request("GET", "/set-cookie?name=session&value=abc", Body::empty()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[http::header::SET_COOKIE],
        "session=abc; Path=/; HttpOnly"
    );
}
