use futures::StreamExt;
use message_bus::MessageBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::registry::WsRegistry;

/// Fanout exchange carrying terminal payment events
pub const PAYMENT_EVENTS_FANOUT: &str = "payment_events_fanout";

/// Start the push consumer: subscribe to the payment events fanout and
/// forward each event verbatim to every connection of the matching user.
///
/// Push is best-effort by contract: the durable queue into the order
/// service remains the authoritative delivery path, this only accelerates
/// the UX.
pub async fn start_payment_events_push(
    bus: Arc<dyn MessageBus>,
    registry: Arc<WsRegistry>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tracing::info!("starting payment events push consumer");

        let mut stream = match bus.subscribe_fanout(PAYMENT_EVENTS_FANOUT).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    exchange = PAYMENT_EVENTS_FANOUT,
                    error = %e,
                    "failed to subscribe to fanout"
                );
                return;
            }
        };
        tracing::info!(exchange = PAYMENT_EVENTS_FANOUT, "subscribed");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("payment events push consumer stopping");
                    return;
                }
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            forward_event(&registry, &delivery.payload).await;
        }

        tracing::warn!("payment events push consumer stopped");
    });
}

async fn forward_event(registry: &WsRegistry, payload: &[u8]) {
    let event: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable fanout event, skipping");
            return;
        }
    };

    let user_id = event.get("user_id").and_then(|v| v.as_i64()).unwrap_or(0);
    if user_id == 0 {
        tracing::warn!("fanout event without user_id, skipping");
        return;
    }

    // The raw body goes out verbatim; clients see exactly what was published
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "fanout event is not utf-8, skipping");
            return;
        }
    };

    let delivered = registry.broadcast(user_id, text).await;
    tracing::debug!(user_id, delivered, "payment event pushed");
}
