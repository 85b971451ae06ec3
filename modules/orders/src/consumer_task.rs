use futures::StreamExt;
use message_bus::retry::{retry_with_backoff, RetryConfig};
use message_bus::{Delivery, MessageBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{OrderStatus, PaymentResultEvent, PAYMENTS_RESULTS_QUEUE};
use crate::repository::OrderRepository;

/// Start the consumer that applies terminal payment results to orders.
///
/// Each delivery commits its status transition (plus the inbox audit row)
/// before being acknowledged. Unparseable bodies and unknown status values
/// are dropped as poison; transient database failures retry locally and then
/// requeue the delivery.
pub async fn start_payment_results_consumer(
    bus: Arc<dyn MessageBus>,
    repo: OrderRepository,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tracing::info!("starting payment results consumer");

        let mut stream = match bus.consume_queue(PAYMENTS_RESULTS_QUEUE).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    queue = PAYMENTS_RESULTS_QUEUE,
                    error = %e,
                    "failed to open queue consumer"
                );
                return;
            }
        };
        tracing::info!(queue = PAYMENTS_RESULTS_QUEUE, "consuming");

        let retry_config = RetryConfig::default();

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("payment results consumer stopping");
                    return;
                }
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            process_delivery(&repo, &retry_config, delivery).await;
        }

        tracing::warn!("payment results consumer stopped");
    });
}

async fn process_delivery(
    repo: &OrderRepository,
    retry_config: &RetryConfig,
    delivery: Delivery,
) {
    let event: PaymentResultEvent = match serde_json::from_slice(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                error = %e,
                event_type = ?delivery.event_type,
                "unparseable payment result, dropping"
            );
            ack_or_log(delivery).await;
            return;
        }
    };

    tracing::info!(
        order_id = event.order_id,
        status = %event.status,
        "received payment result"
    );

    let Some(new_status) = OrderStatus::from_payment_status(&event.status) else {
        // Requeueing cannot fix a vocabulary mismatch, so drop it
        tracing::warn!(
            order_id = event.order_id,
            status = %event.status,
            "unknown payment status, dropping"
        );
        ack_or_log(delivery).await;
        return;
    };

    let result = retry_with_backoff(
        || async {
            repo.apply_payment_result(&event, new_status)
                .await
                .map_err(|e| e.to_string())
        },
        retry_config,
        "orders_payment_results_consumer",
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                order_id = event.order_id,
                status = new_status.as_str(),
                "order transitioned"
            );
            ack_or_log(delivery).await;
        }
        Err(e) => {
            tracing::error!(
                order_id = event.order_id,
                error = %e,
                "transient failure applying payment result, requeueing"
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
