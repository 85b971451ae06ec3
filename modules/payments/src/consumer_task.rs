use futures::StreamExt;
use message_bus::retry::{retry_with_backoff, RetryConfig};
use message_bus::{Delivery, MessageBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::decision::Decision;
use crate::models::{OrderCreatedEvent, ORDERS_QUEUE};
use crate::repository::{AccountRepository, PaymentOutcome};

/// Start the consumer that turns OrderCreated events into payment decisions.
///
/// Each delivery is applied in one database transaction (dedup, row-locked
/// balance check, debit, reply into the outbox) and acknowledged only after
/// commit. Transient database failures retry locally with backoff and then
/// requeue the delivery; unparseable bodies are dropped as poison.
pub async fn start_order_created_consumer(
    bus: Arc<dyn MessageBus>,
    repo: AccountRepository,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tracing::info!("starting order created consumer");

        let mut stream = match bus.consume_queue(ORDERS_QUEUE).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(queue = ORDERS_QUEUE, error = %e, "failed to open queue consumer");
                return;
            }
        };
        tracing::info!(queue = ORDERS_QUEUE, "consuming");

        let retry_config = RetryConfig::default();

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("order created consumer stopping");
                    return;
                }
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            process_delivery(&repo, &retry_config, delivery).await;
        }

        tracing::warn!("order created consumer stopped");
    });
}

async fn process_delivery(
    repo: &AccountRepository,
    retry_config: &RetryConfig,
    delivery: Delivery,
) {
    let event: OrderCreatedEvent = match serde_json::from_slice(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            // Poison message: settle it positively so the queue does not wedge
            tracing::error!(
                error = %e,
                event_type = ?delivery.event_type,
                "unparseable order event, dropping"
            );
            ack_or_log(delivery).await;
            return;
        }
    };

    tracing::info!(
        order_id = event.order_id,
        user_id = event.user_id,
        amount = event.amount,
        "received payment request"
    );

    let result = retry_with_backoff(
        || async {
            repo.apply_order_created(&event)
                .await
                .map_err(|e| e.to_string())
        },
        retry_config,
        "payments_order_created_consumer",
    )
    .await;

    match result {
        Ok(outcome) => {
            match outcome {
                PaymentOutcome::AlreadyProcessed => {
                    tracing::info!(
                        order_id = event.order_id,
                        "duplicate delivery, effect already applied"
                    );
                }
                PaymentOutcome::Decided(Decision::Approve) => {
                    tracing::info!(order_id = event.order_id, "payment succeeded");
                }
                PaymentOutcome::Decided(Decision::Decline(reason)) => {
                    tracing::warn!(
                        order_id = event.order_id,
                        reason = ?reason,
                        "payment failed"
                    );
                }
            }
            ack_or_log(delivery).await;
        }
        Err(e) => {
            tracing::error!(
                order_id = event.order_id,
                error = %e,
                "transient failure applying payment, requeueing"
            );
            if let Err(e) = delivery.nack_requeue().await {
                tracing::error!(error = %e, "failed to requeue delivery");
            }
        }
    }
}

async fn ack_or_log(delivery: Delivery) {
    if let Err(e) = delivery.ack().await {
        tracing::error!(error = %e, "failed to ack delivery");
    }
}
