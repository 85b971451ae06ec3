use message_bus::MessageBus;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::ORDERS_QUEUE;

/// Write an event into the outbox within the caller's transaction, so the
/// event is durable exactly when the order row it describes is.
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders_outbox_events (event_type, payload, status)
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

/// Background task that drains the outbox to the orders queue.
///
/// Every tick selects the oldest unsent rows in primary-key order and
/// publishes them one by one, marking each row `processed` only after its
/// publish succeeded. Failures leave the row `new` for the next tick, which
/// can duplicate a publish; the payment consumer is idempotent.
pub async fn start_outbox_relay(
    pool: PgPool,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("orders outbox relay stopping");
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
        FROM orders_outbox_events
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
            .publish_to_queue(ORDERS_QUEUE, &row.event_type, body)
            .await
        {
            tracing::error!(id = row.id, error = %e, "failed to publish order event, will retry");
            continue;
        }

        match sqlx::query("UPDATE orders_outbox_events SET status = 'processed' WHERE id = $1")
            .bind(row.id)
            .execute(pool)
            .await
        {
            Ok(_) => {
                tracing::info!(id = row.id, event_type = %row.event_type, "order event published");
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
