use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue carrying OrderCreated events to the payment service
pub const ORDERS_QUEUE: &str = "orders_queue";
/// Queue carrying terminal payment events back from the payment service
pub const PAYMENTS_RESULTS_QUEUE: &str = "payments_results_queue";

/// Event name for order creation, as carried in the broker's type header
pub const ORDER_CREATED: &str = "OrderCreated";

/// Lifecycle of an order: created `new`, then exactly one transition to a
/// terminal state driven by the payment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Finished,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Finished => "finished",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Map a payment result status onto the order's terminal state.
    /// Returns `None` for unknown statuses, which the consumer drops.
    pub fn from_payment_status(status: &str) -> Option<OrderStatus> {
        match status {
            "PaymentSucceeded" => Some(OrderStatus::Finished),
            "PaymentFailed" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "new" => Ok(OrderStatus::New),
            "finished" => Ok(OrderStatus::Finished),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Terminal payment event drawn from the payments results queue. The status
/// stays a raw string here so unknown values can be logged and dropped
/// instead of failing the whole parse.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResultEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub amount: i64,
}
