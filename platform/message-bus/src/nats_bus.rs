//! NATS-based implementation of the MessageBus trait

use crate::{
    Acker, BusError, BusResult, Delivery, MessageBus, CONTENT_TYPE_HEADER, EVENT_TYPE_HEADER,
};
use async_nats::jetstream;
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// MessageBus implementation backed by a NATS server
///
/// Durable queues are JetStream streams (one stream per queue, subject equal
/// to the queue name) drained by a durable pull consumer with explicit acks,
/// which gives at-least-once delivery with broker-side redelivery on nack.
/// Fanout exchanges use core NATS publish/subscribe: every subscriber gets a
/// copy, nothing is retained.
///
/// # Example
/// ```rust,no_run
/// use message_bus::{MessageBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(client);
///
/// bus.publish_to_queue("orders_queue", "OrderCreated", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    // Streams already created or verified this process lifetime
    ensured_streams: Mutex<HashSet<String>>,
}

impl NatsBus {
    /// Create a new NatsBus from an already-connected client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            ensured_streams: Mutex::new(HashSet::new()),
        }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn headers(event_type: &str) -> async_nats::HeaderMap {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(CONTENT_TYPE_HEADER, "application/json");
        headers.insert(EVENT_TYPE_HEADER, event_type);
        headers
    }

    /// Create the backing stream for a queue if it does not exist yet.
    async fn ensure_queue_stream(&self, queue: &str) -> BusResult<()> {
        let mut ensured = self.ensured_streams.lock().await;
        if ensured.contains(queue) {
            return Ok(());
        }

        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: queue.to_string(),
                subjects: vec![queue.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        ensured.insert(queue.to_string());
        Ok(())
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish_to_queue(
        &self,
        queue: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        self.ensure_queue_stream(queue).await?;

        let ack = self
            .jetstream
            .publish_with_headers(queue.to_string(), Self::headers(event_type), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        // Wait for the broker to confirm the message is persisted
        ack.await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn publish_to_fanout(
        &self,
        exchange: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        self.client
            .publish_with_headers(
                exchange.to_string(),
                Self::headers(event_type),
                payload.into(),
            )
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn consume_queue(&self, queue: &str) -> BusResult<BoxStream<'static, Delivery>> {
        self.ensure_queue_stream(queue).await?;

        let stream = self
            .jetstream
            .get_stream(queue)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let durable = format!("{queue}-worker");
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let queue = queue.to_string();
        let stream = async_stream::stream! {
            while let Some(next) = messages.next().await {
                match next {
                    Ok(msg) => {
                        let event_type = msg
                            .headers
                            .as_ref()
                            .and_then(|h| h.get(EVENT_TYPE_HEADER))
                            .map(|v| v.to_string());
                        yield Delivery {
                            event_type,
                            payload: msg.payload.to_vec(),
                            acker: Acker::Jetstream(Box::new(msg)),
                        };
                    }
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "queue consumer stream error");
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn subscribe_fanout(&self, exchange: &str) -> BusResult<BoxStream<'static, Delivery>> {
        let subscriber = self
            .client
            .subscribe(exchange.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber.map(|msg| {
            let event_type = msg
                .headers
                .as_ref()
                .and_then(|h| h.get(EVENT_TYPE_HEADER))
                .map(|v| v.as_str().to_string());
            Delivery {
                event_type,
                payload: msg.payload.to_vec(),
                acker: Acker::None,
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running NATS server with JetStream enabled.
    // For CI, use the InMemoryBus tests instead.
    // For manual runs: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn queue_roundtrip_with_ack() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");
        let bus = NatsBus::new(client);

        bus.publish_to_queue("test_bus_queue", "TestEvent", b"payload".to_vec())
            .await
            .unwrap();

        let mut deliveries = bus.consume_queue("test_bus_queue").await.unwrap();
        let delivery = tokio::time::timeout(std::time::Duration::from_secs(2), deliveries.next())
            .await
            .expect("timeout waiting for delivery")
            .expect("stream ended");

        assert_eq!(delivery.event_type.as_deref(), Some("TestEvent"));
        assert_eq!(delivery.payload, b"payload");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn fanout_reaches_live_subscriber() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");
        let bus = NatsBus::new(client);

        let mut stream = bus.subscribe_fanout("test_bus_fanout").await.unwrap();

        bus.publish_to_fanout("test_bus_fanout", "TestEvent", b"copy".to_vec())
            .await
            .unwrap();

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for delivery")
            .expect("stream ended");

        assert_eq!(delivery.payload, b"copy");
    }
}
