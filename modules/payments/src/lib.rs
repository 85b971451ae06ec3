pub mod config;
pub mod consumer_task;
pub mod decision;
pub mod events;
pub mod handlers;
pub mod models;
pub mod repository;

use axum::routing::{get, post};
use axum::Router;

pub use consumer_task::start_order_created_consumer;
pub use repository::{AccountRepository, PaymentOutcome};

/// Schema migrations, exported so integration tests can apply them
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./db/migrations");

/// Build the HTTP surface of the payment service
pub fn router(repo: AccountRepository) -> Router {
    Router::new()
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/deposit", post(handlers::deposit))
        .route("/accounts/balance", get(handlers::get_balance))
        .route("/api/health", get(handlers::health))
        .with_state(repo)
}
