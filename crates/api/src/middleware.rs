//! Request telemetry middleware.
//!
//! Both layers observe the exchange without changing what the client
//! receives; all recording happens in memory before the response is returned.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::{Body, Bytes, HttpBody, to_bytes},
    extract::{ConnectInfo, FromRequest, MatchedPath, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pizza_telemetry::{ErrorReport, HttpExchange, Telemetry};
use sha2::{Digest, Sha256};

/// Largest body buffered for logging, matching axum's default body limit.
pub const MAX_CAPTURE_BYTES: usize = 2 * 1024 * 1024;

/// Feed method, route, status and latency of every request to the aggregator.
///
/// The route label is the matched pattern (`/api/franchise/{id}`) so path
/// parameters do not explode cardinality; unmatched requests fall back to
/// the raw path.
///
/// A request carrying a bearer token that the handler did not reject with a
/// 401 counts its token holder as an active user.
pub async fn track_requests(
    State(telemetry): State<Telemetry>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = route_label(&request);
    let user = bearer_fingerprint(request.headers());

    let response = next.run(request).await;
    let status = response.status();

    telemetry.observe_request(method.as_str(), &route, status.as_u16(), elapsed_ms(start));
    if let Some(user) = user.filter(|_| status != StatusCode::UNAUTHORIZED) {
        telemetry.record_active_user(&user);
    }
    response
}

/// Queue an `http` log record for every request, and an `error` record when
/// the handler attached an [`ErrorReport`] to its response.
pub async fn log_http(
    State(telemetry): State<Telemetry>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    let method = parts.method.clone();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| parts.uri.path().to_owned());
    let has_auth = parts.headers.contains_key(header::AUTHORIZATION);
    let user_agent = header_str(&parts.headers, header::USER_AGENT.as_str()).map(str::to_owned);
    let client_ip = client_ip(&parts);

    let (request_body, response) = if is_json(&parts.headers) {
        // The default body limit applies; it matches MAX_CAPTURE_BYTES.
        match Bytes::from_request(Request::new(body), &()).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
                (Some(text), response)
            }
            Err(rejection) => {
                // 413 when over the limit, 400 when the body stream failed.
                tracing::debug!(error = %rejection, "Failed to buffer request body");
                let report = ErrorReport::from_error("BodyError", &rejection);
                let mut response = rejection.into_response();
                response.extensions_mut().insert(report);
                (None, response)
            }
        }
    } else {
        (None, next.run(Request::from_parts(parts, body)).await)
    };

    let (parts, body) = response.into_parts();
    let (body, response_body) = capture_response(body).await;

    let status = parts.status.as_u16();
    if let Some(report) = parts.extensions.get::<ErrorReport>() {
        telemetry.log_error(
            report,
            &serde_json::json!({
                "method": method.as_str(),
                "path": path,
                "status": status,
            }),
        );
    }

    telemetry.log_http(HttpExchange {
        method: method.as_str(),
        path: &path,
        status,
        has_auth,
        request_body: request_body.as_deref(),
        response_body: &response_body,
        latency_ms: elapsed_ms(start),
        client_ip: client_ip.as_deref(),
        user_agent: user_agent.as_deref(),
    });

    Response::from_parts(parts, body)
}

fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned())
}

/// Buffer a fully-sized response body so its text can be logged.
///
/// Streaming bodies of unknown length pass through untouched.
async fn capture_response(body: Body) -> (Body, String) {
    let known = body
        .size_hint()
        .exact()
        .is_some_and(|len| len <= MAX_CAPTURE_BYTES as u64);
    if !known {
        return (body, String::new());
    }

    match to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            (Body::from(bytes), text)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer response body");
            (Body::empty(), String::new())
        }
    }
}

/// Stable, non-reversible identity for the holder of a bearer token.
fn bearer_fingerprint(headers: &HeaderMap) -> Option<String> {
    let (scheme, token) = header_str(headers, header::AUTHORIZATION.as_str())?.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    let digest = Sha256::digest(token.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(&digest[..12]))
}

fn is_json(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE.as_str()).is_some_and(|ct| {
        let mime = ct.split(';').next().unwrap_or_default().trim();
        mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Peer address when served with connect info, else the first forwarded hop.
fn client_ip(parts: &axum::http::request::Parts) -> Option<String> {
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }
    header_str(&parts.headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_owned())
        .filter(|ip| !ip.is_empty())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
