use message_bus::retry::connect_with_retry;
use message_bus::{InMemoryBus, MessageBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gateway_rs::config::Config;
use gateway_rs::{router, start_payment_events_push, GatewayState, WsRegistry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting API gateway...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    let bus: Arc<dyn MessageBus> = match config.bus_type.to_lowercase().as_str() {
        "inmemory" => {
            tracing::info!("Using InMemory message bus");
            Arc::new(InMemoryBus::new())
        }
        "nats" => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            let client = connect_with_retry(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            Arc::new(NatsBus::new(client))
        }
        other => panic!("Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'", other),
    };

    let registry = Arc::new(WsRegistry::new());
    let cancel = CancellationToken::new();

    start_payment_events_push(bus.clone(), registry.clone(), cancel.clone()).await;

    let state = GatewayState {
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client"),
        orders_upstream: config.orders_upstream_url.clone(),
        payments_upstream: config.payments_upstream_url.clone(),
        registry,
    };

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST/PORT");
    tracing::info!(
        "API gateway listening on {} (orders -> {}, payments -> {})",
        addr,
        config.orders_upstream_url,
        config.payments_upstream_url
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .expect("Server failed to start");
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    cancel.cancel();
}
