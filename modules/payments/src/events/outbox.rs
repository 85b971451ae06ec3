use message_bus::MessageBus;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{PAYMENTS_RESULTS_QUEUE, PAYMENT_EVENTS_FANOUT};

/// Write an event into the outbox within the caller's transaction.
///
/// Handlers only ever get this transactional entry point, so a terminal
/// payment event is durable exactly when the balance change it describes is.
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payments_outbox_events (event_type, payload, status)
        VALUES ($1, $2, 'new')
        "#,
    )
    .bind(event_type)
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(event_type = %event_type, "event enqueued to outbox");
    Ok(())
}

/// Background task that drains the outbox to the broker.
///
/// Every tick picks up the oldest unsent rows and publishes each one to the
/// results queue and the fanout exchange. A row is marked processed only
/// after both publishes succeed; any failure leaves it `new` for the next
/// tick. Duplicate publishes are possible by design and absorbed downstream.
pub async fn start_outbox_relay(
    pool: PgPool,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("payments outbox relay stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = relay_batch(&pool, bus.as_ref()).await {
            tracing::error!(error = %e, "outbox relay tick failed");
        }
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    payload: serde_json::Value,
}

async fn relay_batch(pool: &PgPool, bus: &dyn MessageBus) -> Result<(), sqlx::Error> {
    let rows: Vec<OutboxRow> = sqlx::query_as(
        r#"
        SELECT id, event_type, payload
        FROM payments_outbox_events
        WHERE status = 'new'
        ORDER BY id ASC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await?;

    for row in rows {
        let body = row.payload.to_string().into_bytes();

        if let Err(e) = bus
            .publish_to_queue(PAYMENTS_RESULTS_QUEUE, &row.event_type, body.clone())
            .await
        {
            tracing::error!(id = row.id, error = %e, "failed to publish payment result, will retry");
            continue;
        }
        if let Err(e) = bus
            .publish_to_fanout(PAYMENT_EVENTS_FANOUT, &row.event_type, body)
            .await
        {
            // The whole row retries next tick; the queue consumer absorbs
            // the duplicate, the push path is best-effort anyway.
            tracing::error!(id = row.id, error = %e, "failed to publish to fanout, will retry");
            continue;
        }

        match sqlx::query("UPDATE payments_outbox_events SET status = 'processed' WHERE id = $1")
            .bind(row.id)
            .execute(pool)
            .await
        {
            Ok(_) => {
                tracing::info!(id = row.id, event_type = %row.event_type, "payment event published");
            }
            Err(e) => {
                tracing::error!(
                    id = row.id,
                    error = %e,
                    "event published but not marked processed; consumers will see a duplicate"
                );
            }
        }
    }

    Ok(())
}
