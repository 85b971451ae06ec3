use axum::body::{self, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::registry::WsRegistry;

/// Shared state for the gateway's handlers
#[derive(Clone)]
pub struct GatewayState {
    pub http: reqwest::Client,
    pub orders_upstream: String,
    pub payments_upstream: String,
    pub registry: Arc<WsRegistry>,
}

/// Hop-by-hop headers that must not be copied through the proxy
const SKIPPED_HEADERS: [&str; 3] = ["connection", "transfer-encoding", "content-length"];

pub async fn proxy_to_orders(State(state): State<GatewayState>, req: Request) -> Response {
    forward(&state.http, &state.orders_upstream, req).await
}

pub async fn proxy_to_payments(State(state): State<GatewayState>, req: Request) -> Response {
    forward(&state.http, &state.payments_upstream, req).await
}

/// Relay a request to an upstream service: method, path, query string,
/// headers, and body go through; the upstream response comes back as-is.
/// Connection failures and the client timeout surface as 502.
async fn forward(client: &reqwest::Client, upstream: &str, req: Request) -> Response {
    let (parts, req_body) = req.into_parts();

    let url = match parts.uri.query() {
        Some(query) => format!("{}{}?{}", upstream, parts.uri.path(), query),
        None => format!("{}{}", upstream, parts.uri.path()),
    };

    let body_bytes = match body::to_bytes(req_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(method) => method,
        Err(_) => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    let mut upstream_req = client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        upstream_req = upstream_req.header(name.as_str(), value.as_bytes());
    }

    let upstream_resp = match upstream_req.body(body_bytes.to_vec()).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(url = %url, error = %e, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "upstream error").into_response();
        }
    };

    let status = StatusCode::from_u16(upstream_resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_resp.headers().iter() {
        if SKIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let resp_bytes = match upstream_resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(url = %url, error = %e, "failed to read upstream response");
            return (StatusCode::BAD_GATEWAY, "upstream error").into_response();
        }
    };

    builder
        .body(Body::from(resp_bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
