//! Gateway behavior tests: fanout-to-WebSocket push over the in-memory bus,
//! WebSocket subscription validation against a live server, and proxy error
//! mapping. No external services required.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use gateway_rs::push::PAYMENT_EVENTS_FANOUT;
use gateway_rs::{router, start_payment_events_push, GatewayState, WsRegistry};
use message_bus::{InMemoryBus, MessageBus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_state(registry: Arc<WsRegistry>) -> GatewayState {
    GatewayState {
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap(),
        // Nothing listens here; proxied requests must come back as 502
        orders_upstream: "http://127.0.0.1:9".to_string(),
        payments_upstream: "http://127.0.0.1:9".to_string(),
        registry,
    }
}

/// Serve the gateway router on an ephemeral port.
async fn spawn_server(registry: Arc<WsRegistry>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(test_state(registry));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn recv_pushed(
    receiver: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn payment_events_are_pushed_verbatim_to_the_matching_user() {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let registry = Arc::new(WsRegistry::new());
    let cancel = CancellationToken::new();

    let (_, mut rx_first) = registry.add(7).await;
    let (_, mut rx_second) = registry.add(7).await;
    let (_, mut rx_other) = registry.add(8).await;

    start_payment_events_push(bus.clone(), registry.clone(), cancel.clone()).await;
    // Let the consumer bind its subscription before publishing
    tokio::time::sleep(Duration::from_millis(50)).await;

    let body = r#"{"order_id":42,"user_id":7,"status":"PaymentSucceeded"}"#;
    bus.publish_to_fanout(
        PAYMENT_EVENTS_FANOUT,
        "PaymentSucceeded",
        body.as_bytes().to_vec(),
    )
    .await
    .unwrap();

    assert_eq!(recv_pushed(&mut rx_first).await.as_deref(), Some(body));
    assert_eq!(recv_pushed(&mut rx_second).await.as_deref(), Some(body));

    // The other user's connection must stay silent
    let silent = tokio::time::timeout(Duration::from_millis(200), rx_other.recv()).await;
    assert!(silent.is_err());

    cancel.cancel();
}

#[tokio::test]
async fn malformed_events_are_skipped_without_killing_the_consumer() {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let registry = Arc::new(WsRegistry::new());
    let cancel = CancellationToken::new();

    let (_, mut rx) = registry.add(7).await;

    start_payment_events_push(bus.clone(), registry.clone(), cancel.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // No user_id, then not JSON at all
    bus.publish_to_fanout(
        PAYMENT_EVENTS_FANOUT,
        "PaymentSucceeded",
        br#"{"order_id":42,"status":"PaymentSucceeded"}"#.to_vec(),
    )
    .await
    .unwrap();
    bus.publish_to_fanout(PAYMENT_EVENTS_FANOUT, "PaymentSucceeded", b"not json".to_vec())
        .await
        .unwrap();

    // Then a well-formed event, to prove the consumer survived the bad ones
    let body = r#"{"order_id":43,"user_id":7,"status":"PaymentFailed"}"#;
    bus.publish_to_fanout(
        PAYMENT_EVENTS_FANOUT,
        "PaymentFailed",
        body.as_bytes().to_vec(),
    )
    .await
    .unwrap();

    assert_eq!(recv_pushed(&mut rx).await.as_deref(), Some(body));
    cancel.cancel();
}

#[tokio::test]
async fn websocket_clients_receive_events_and_unregister_on_disconnect() {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let registry = Arc::new(WsRegistry::new());
    let cancel = CancellationToken::new();

    start_payment_events_push(bus.clone(), registry.clone(), cancel.clone()).await;
    let addr = spawn_server(registry.clone()).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id=7"))
            .await
            .expect("websocket handshake failed");

    // Wait for the connection to land in the registry
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.connection_count(7).await == 0 {
        assert!(tokio::time::Instant::now() < deadline, "connection never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let body = r#"{"order_id":42,"user_id":7,"status":"PaymentSucceeded"}"#;
    bus.publish_to_fanout(
        PAYMENT_EVENTS_FANOUT,
        "PaymentSucceeded",
        body.as_bytes().to_vec(),
    )
    .await
    .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("no websocket frame")
        .expect("socket closed")
        .expect("websocket error");
    match frame {
        tungstenite::Message::Text(text) => assert_eq!(text, body),
        other => panic!("expected a text frame, got {:?}", other),
    }

    // Dropping the client must prune the registry entry
    drop(socket);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.connection_count(7).await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "connection never removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
}

#[tokio::test]
async fn websocket_without_a_user_id_is_rejected() {
    let registry = Arc::new(WsRegistry::new());
    let addr = spawn_server(registry).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 400)
        }
        other => panic!("expected an HTTP 400 rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn unreachable_upstream_surfaces_as_bad_gateway() {
    let registry = Arc::new(WsRegistry::new());
    let app = router(test_state(registry));

    let request = Request::builder()
        .uri("/orders?user_id=7")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
