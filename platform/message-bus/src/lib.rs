//! # MessageBus Abstraction
//!
//! A platform-level abstraction over the message broker that both services
//! and the gateway share.
//!
//! Two delivery disciplines are exposed:
//!
//! - **Durable queues**: competing consumers, at-least-once delivery with
//!   per-message ack/nack. A nacked delivery is requeued and redelivered, so
//!   consumers must be idempotent.
//! - **Fanout exchanges**: every live subscriber receives a copy, no
//!   acknowledgement, at-most-once. Used for best-effort push.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation; queues are NATS JetStream
//!   streams with durable pull consumers, fanout is core NATS pub/sub
//! - **InMemoryBus**: dev/test implementation using in-process channels
//!
//! ## Usage
//!
//! ```rust,no_run
//! use message_bus::{InMemoryBus, MessageBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
//!
//! bus.publish_to_queue("orders_queue", "OrderCreated", br#"{"order_id":1}"#.to_vec())
//!     .await?;
//!
//! let mut deliveries = bus.consume_queue("orders_queue").await?;
//! while let Some(delivery) = futures::StreamExt::next(&mut deliveries).await {
//!     // apply the domain effect, then:
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod inmemory_bus;
mod nats_bus;
pub mod retry;

pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

use crate::inmemory_bus::{QueueState, StoredMessage};

/// Broker header carrying the event name of a message.
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// Broker header carrying the body encoding. Always `application/json` here.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// A single message handed to a consumer.
///
/// Queue deliveries must be settled exactly once with [`Delivery::ack`] or
/// [`Delivery::nack_requeue`]; fanout deliveries carry no acknowledgement
/// state and both calls are no-ops.
pub struct Delivery {
    /// Event name from the broker's type header, if the publisher set one
    pub event_type: Option<String>,
    /// Raw message body
    pub payload: Vec<u8>,
    pub(crate) acker: Acker,
}

pub(crate) enum Acker {
    /// Fanout deliveries need no settlement
    None,
    /// In-memory queue delivery; holds what is needed to requeue on nack
    Queue {
        queue: std::sync::Arc<QueueState>,
        message: StoredMessage,
    },
    /// JetStream delivery with broker-side ack state
    Jetstream(Box<async_nats::jetstream::Message>),
}

impl Delivery {
    /// Settle the delivery positively. The broker will not redeliver it.
    pub async fn ack(self) -> BusResult<()> {
        match self.acker {
            // The in-memory queue removes a message when it is handed out,
            // so a positive settlement has nothing left to do.
            Acker::None | Acker::Queue { .. } => Ok(()),
            Acker::Jetstream(msg) => msg
                .ack()
                .await
                .map_err(|e| BusError::InternalError(e.to_string())),
        }
    }

    /// Settle the delivery negatively and ask the broker to redeliver it.
    pub async fn nack_requeue(self) -> BusResult<()> {
        match self.acker {
            Acker::None => Ok(()),
            Acker::Queue { queue, message } => {
                queue.requeue_front(message);
                Ok(())
            }
            Acker::Jetstream(msg) => msg
                .ack_with(async_nats::jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| BusError::InternalError(e.to_string())),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event_type", &self.event_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Errors that can occur when talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core broker abstraction shared by the services and the gateway.
///
/// Implementations must guarantee that a queue message which was published
/// but never acked is eventually redelivered (at-least-once), and that
/// fanout publishes never block on slow subscribers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message onto a durable queue.
    ///
    /// Exactly one consumer of the queue will receive each copy. The event
    /// name travels in the broker's type header, the body as JSON bytes.
    async fn publish_to_queue(
        &self,
        queue: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()>;

    /// Publish a message onto a fanout exchange.
    ///
    /// Every currently bound subscriber receives a copy; nothing is retained
    /// for subscribers that join later.
    async fn publish_to_fanout(
        &self,
        exchange: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()>;

    /// Open a long-lived consumer on a durable queue.
    ///
    /// Deliveries must be settled with [`Delivery::ack`] or
    /// [`Delivery::nack_requeue`]; an unsettled or nacked delivery is
    /// redelivered.
    async fn consume_queue(&self, queue: &str) -> BusResult<BoxStream<'static, Delivery>>;

    /// Bind a transient subscription to a fanout exchange.
    ///
    /// Best-effort: deliveries are not acknowledged and a lagging subscriber
    /// may miss messages.
    async fn subscribe_fanout(&self, exchange: &str) -> BusResult<BoxStream<'static, Delivery>>;
}

impl fmt::Debug for dyn MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageBus")
    }
}
