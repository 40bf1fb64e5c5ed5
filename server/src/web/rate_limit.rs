use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::app_state::AppState;

/// Rate-limit key for a request.
///
/// Behind a local reverse proxy every peer is loopback, so the proxy's
/// `X-Forwarded-For` first hop (or `X-Real-IP`) names the client instead.
/// Header values that are not IP addresses are ignored.
fn client_ip(req: &Request<Body>) -> String {
    let Some(peer) = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip())
    else {
        return "unknown".to_string();
    };

    if !peer.is_loopback() {
        return peer.to_string();
    }
    forwarded_client(req.headers()).unwrap_or(peer).to_string()
}

fn forwarded_client(headers: &HeaderMap) -> Option<IpAddr> {
    let first_hop = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    [first_hop, real_ip]
        .into_iter()
        .flatten()
        .find_map(|raw| raw.trim().parse().ok())
}

/// Per-IP limit for the status API. Refusals carry `Retry-After` in whole seconds.
pub async fn status_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if let Err(wait) = state.limiter.acquire(&ip) {
        let secs = wait.as_secs_f64().ceil().max(1.0) as u64;
        let mut resp = (
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            resp.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return resp;
    }
    next.run(req).await
}
