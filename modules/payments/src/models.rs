use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue carrying OrderCreated events from the order service
pub const ORDERS_QUEUE: &str = "orders_queue";
/// Queue carrying terminal payment events back to the order service
pub const PAYMENTS_RESULTS_QUEUE: &str = "payments_results_queue";
/// Fanout exchange mirroring terminal payment events for push subscribers
pub const PAYMENT_EVENTS_FANOUT: &str = "payment_events_fanout";

/// Event name for order creation, as carried in the broker's type header
pub const ORDER_CREATED: &str = "OrderCreated";

/// A user's money account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// Incoming payment request drawn from the orders queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: i64,
}

/// Terminal state of a payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    PaymentSucceeded,
    PaymentFailed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::PaymentSucceeded => "PaymentSucceeded",
            PaymentStatus::PaymentFailed => "PaymentFailed",
        }
    }
}

/// Terminal payment event: the canonical cross-service reply for both the
/// order inbox and the gateway push bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResultEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub user_id: i64,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_serializes_to_wire_names() {
        let event = PaymentResultEvent {
            order_id: 42,
            user_id: 7,
            status: PaymentStatus::PaymentSucceeded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"order_id": 42, "user_id": 7, "status": "PaymentSucceeded"})
        );
    }

    #[test]
    fn order_created_event_parses_from_wire_shape() {
        let event: OrderCreatedEvent =
            serde_json::from_str(r#"{"order_id": 1, "user_id": 7, "amount": 300}"#).unwrap();
        assert_eq!(event.order_id, 1);
        assert_eq!(event.user_id, 7);
        assert_eq!(event.amount, 300);
    }

    #[test]
    fn unexpected_status_value_is_rejected() {
        let result = serde_json::from_str::<PaymentResultEvent>(
            r#"{"order_id": 1, "user_id": 7, "status": "PaymentPending"}"#,
        );
        assert!(result.is_err());
    }
}
