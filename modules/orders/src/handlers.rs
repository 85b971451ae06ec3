use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::models::{CreateOrderRequest, Order};
use crate::repository::{OrderRepoError, OrderRepository};

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error wrapper mapping domain failures onto HTTP status codes
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<OrderRepoError> for ApiError {
    fn from(e: OrderRepoError) -> Self {
        match e {
            OrderRepoError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: "order not found".to_string(),
            },
            OrderRepoError::Database(e) => {
                tracing::error!(error = %e, "order repository failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

/// Handler for POST /orders
///
/// Validates the amount up front and returns immediately on failure; the
/// order row and its OrderCreated outbox row commit together.
pub async fn create_order(
    State(repo): State<OrderRepository>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if req.amount <= 0 {
        return Err(ApiError::bad_request("amount must be positive"));
    }
    let order = repo.create_with_outbox(req.user_id, req.amount).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: i64,
}

/// Handler for GET /orders?user_id= (newest first)
pub async fn list_orders(
    State(repo): State<OrderRepository>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = repo.list_for_user(query.user_id).await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct OrderByIdQuery {
    pub id: i64,
}

/// Handler for GET /orders/by-id?id=
pub async fn get_order(
    State(repo): State<OrderRepository>,
    Query(query): Query<OrderByIdQuery>,
) -> Result<Json<Order>, ApiError> {
    let order = repo.get(query.id).await?;
    Ok(Json(order))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "orders",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
