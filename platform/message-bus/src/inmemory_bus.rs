//! In-memory implementation of the MessageBus trait for testing and development

use crate::{Acker, BusResult, Delivery, MessageBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

/// A message held by a queue or exchange
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub(crate) event_type: Option<String>,
    pub(crate) payload: Vec<u8>,
}

/// One FIFO queue: pending messages plus a wakeup for idle consumers
pub(crate) struct QueueState {
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push_back(&self, message: StoredMessage) {
        self.messages
            .lock()
            .expect("queue mutex poisoned")
            .push_back(message);
        self.notify.notify_one();
    }

    /// Requeue a nacked message at the head so redelivery preserves order.
    pub(crate) fn requeue_front(&self, message: StoredMessage) {
        self.messages
            .lock()
            .expect("queue mutex poisoned")
            .push_front(message);
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<StoredMessage> {
        self.messages
            .lock()
            .expect("queue mutex poisoned")
            .pop_front()
    }
}

/// MessageBus implementation backed by in-process channels
///
/// This implementation is suitable for:
/// - Unit and integration tests (no external dependencies)
/// - Local development without Docker
///
/// Queues are FIFO with competing consumers: each message goes to exactly one
/// consumer, and a nack puts it back at the head of the queue. Fanout
/// exchanges are Tokio broadcast channels, one per exchange.
///
/// Durability ends with the process: a consumer that takes a message and dies
/// without settling it loses that message. The production bus does not have
/// this limitation.
#[derive(Clone)]
pub struct InMemoryBus {
    queues: Arc<Mutex<HashMap<String, Arc<QueueState>>>>,
    exchanges: Arc<Mutex<HashMap<String, broadcast::Sender<StoredMessage>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            exchanges: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        let mut queues = self.queues.lock().expect("queue map mutex poisoned");
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }

    fn exchange(&self, name: &str) -> broadcast::Sender<StoredMessage> {
        let mut exchanges = self.exchanges.lock().expect("exchange map mutex poisoned");
        exchanges
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_to_queue(
        &self,
        queue: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        self.queue(queue).push_back(StoredMessage {
            event_type: Some(event_type.to_string()),
            payload,
        });
        Ok(())
    }

    async fn publish_to_fanout(
        &self,
        exchange: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        // A send error only means there are no subscribers right now
        let _ = self.exchange(exchange).send(StoredMessage {
            event_type: Some(event_type.to_string()),
            payload,
        });
        Ok(())
    }

    async fn consume_queue(&self, queue: &str) -> BusResult<BoxStream<'static, Delivery>> {
        let state = self.queue(queue);

        let stream = async_stream::stream! {
            loop {
                match state.pop_front() {
                    Some(message) => {
                        yield Delivery {
                            event_type: message.event_type.clone(),
                            payload: message.payload.clone(),
                            acker: Acker::Queue {
                                queue: state.clone(),
                                message,
                            },
                        };
                    }
                    None => state.notify.notified().await,
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn subscribe_fanout(&self, exchange: &str) -> BusResult<BoxStream<'static, Delivery>> {
        let mut receiver = self.exchange(exchange).subscribe();
        let exchange = exchange.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        yield Delivery {
                            event_type: message.event_type,
                            payload: message.payload,
                            acker: Acker::None,
                        };
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Fanout is at-most-once: a slow subscriber drops messages
                        tracing::warn!(
                            exchange = %exchange,
                            skipped = skipped,
                            "fanout subscriber lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
