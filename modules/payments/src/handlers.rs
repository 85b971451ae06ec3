use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::models::{Account, BalanceResponse, CreateAccountRequest, DepositRequest};
use crate::repository::{AccountRepoError, AccountRepository};

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

impl From<AccountRepoError> for ApiError {
    fn from(e: AccountRepoError) -> Self {
        match e {
            AccountRepoError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: "account not found".to_string(),
            },
            AccountRepoError::Database(e) => {
                tracing::error!(error = %e, "account repository failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

/// Handler for POST /accounts
///
/// Creates the user's account lazily; repeating the call returns the
/// existing account rather than failing.
pub async fn create_account(
    State(repo): State<AccountRepository>,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let account = repo.create_account(req.user_id).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Handler for POST /accounts/deposit
///
/// Negative amounts are rejected outright; a zero deposit is accepted as a
/// no-op that still appends its 0 ledger row.
pub async fn deposit(
    State(repo): State<AccountRepository>,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<Json<Account>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if req.amount < 0 {
        return Err(ApiError::bad_request("amount cannot be negative"));
    }
    let account = repo.deposit(req.user_id, req.amount).await?;
    Ok(Json(account))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub user_id: i64,
}

/// Handler for GET /accounts/balance?user_id=
pub async fn get_balance(
    State(repo): State<AccountRepository>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = repo.get_by_user_id(query.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: query.user_id,
        balance: account.balance,
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "payments",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
