pub mod config;
pub mod consumer_task;
pub mod events;
pub mod handlers;
pub mod models;
pub mod repository;

use axum::routing::{get, post};
use axum::Router;

pub use consumer_task::start_payment_results_consumer;
pub use repository::OrderRepository;

/// Schema migrations, exported so integration tests can apply them
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./db/migrations");

/// Build the HTTP surface of the order service
pub fn router(repo: OrderRepository) -> Router {
    Router::new()
        .route("/orders", post(handlers::create_order).get(handlers::list_orders))
        .route("/orders/by-id", get(handlers::get_order))
        .route("/api/health", get(handlers::health))
        .with_state(repo)
}
