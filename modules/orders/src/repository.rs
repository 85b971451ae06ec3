use sqlx::PgPool;

use crate::events::enqueue_event;
use crate::models::{Order, OrderStatus, PaymentResultEvent, ORDER_CREATED};

#[derive(Debug, thiserror::Error)]
pub enum OrderRepoError {
    #[error("order not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an order in state `new` and its OrderCreated outbox row in one
    /// transaction: either both are durable or neither is.
    pub async fn create_with_outbox(
        &self,
        user_id: i64,
        amount: i64,
    ) -> Result<Order, OrderRepoError> {
        let mut tx = self.pool.begin().await?;

        let order: Order = sqlx::query_as(
            r#"
            INSERT INTO orders (user_id, amount, status)
            VALUES ($1, $2, 'new')
            RETURNING id, user_id, amount, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let payload = serde_json::json!({
            "order_id": order.id,
            "user_id": order.user_id,
            "amount": order.amount,
        });
        enqueue_event(&mut tx, ORDER_CREATED, &payload).await?;

        tx.commit().await?;
        Ok(order)
    }

    /// All orders for a user, newest first.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Order>, OrderRepoError> {
        let orders = sqlx::query_as(
            r#"
            SELECT id, user_id, amount, status, created_at
            FROM orders
            WHERE user_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    pub async fn get(&self, id: i64) -> Result<Order, OrderRepoError> {
        sqlx::query_as(
            "SELECT id, user_id, amount, status, created_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderRepoError::NotFound)
    }

    /// Record a payment result and move the order to its terminal state, in
    /// one transaction.
    ///
    /// The update is guarded on `status = 'new'`: a redelivered or
    /// contradictory terminal event affects zero rows, so an order
    /// transitions at most once and never regresses.
    pub async fn apply_payment_result(
        &self,
        event: &PaymentResultEvent,
        new_status: OrderStatus,
    ) -> Result<(), OrderRepoError> {
        let mut tx = self.pool.begin().await?;

        let payload = serde_json::json!({
            "order_id": event.order_id,
            "user_id": event.user_id,
            "status": event.status,
        });
        sqlx::query(
            r#"
            INSERT INTO orders_inbox_messages (message_id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(event.order_id.to_string())
        .bind(&event.status)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2 AND status = 'new'")
            .bind(new_status.as_str())
            .bind(event.order_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if updated == 0 {
            tracing::debug!(
                order_id = event.order_id,
                "order already terminal or unknown, no transition"
            );
        }
        Ok(())
    }
}
