pub mod config;
pub mod proxy;
pub mod push;
pub mod registry;
pub mod ws;

use axum::http::{header, Method};
use axum::routing::{any, get};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

pub use proxy::GatewayState;
pub use push::start_payment_events_push;
pub use registry::WsRegistry;

/// Build the gateway's HTTP surface: proxied service routes, the WebSocket
/// push endpoint, and health.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/orders", any(proxy::proxy_to_orders))
        .route("/orders/by-id", any(proxy::proxy_to_orders))
        .route("/accounts", any(proxy::proxy_to_payments))
        .route("/accounts/deposit", any(proxy::proxy_to_payments))
        .route("/accounts/balance", any(proxy::proxy_to_payments))
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(health))
        .layer(cors_layer())
        .with_state(state)
}

/// Browser-facing CORS policy: open origin, the verbs the services accept,
/// and the two headers clients send. Preflight OPTIONS is answered here.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
