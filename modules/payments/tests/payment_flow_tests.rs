//! Integration tests for the payment service core: account lifecycle,
//! row-locked deposits, and the idempotent payment decision path.
//!
//! These tests need a Postgres database reachable via DATABASE_URL and are
//! therefore #[ignore]d; run them with `cargo test -- --ignored` once the
//! database is up (e.g. `docker compose up -d postgres`).

use message_bus::{InMemoryBus, MessageBus};
use payments_rs::decision::{Decision, DeclineReason};
use payments_rs::models::{OrderCreatedEvent, PAYMENTS_RESULTS_QUEUE};
use payments_rs::repository::{AccountRepository, PaymentOutcome};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    payments_rs::MIGRATOR
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn cleanup_test_data(pool: &PgPool) {
    for table in [
        "payments_outbox_events",
        "payments_inbox_messages",
        "account_transactions",
        "accounts",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(pool)
            .await
            .unwrap_or_else(|_| panic!("Failed to clean {}", table));
    }
}

async fn ledger_sum(pool: &PgPool, account_id: i64) -> i64 {
    let (sum,): (Option<i64>,) = sqlx::query_as(
        "SELECT SUM(amount)::BIGINT FROM account_transactions WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await
    .expect("Failed to sum ledger");
    sum.unwrap_or(0)
}

async fn outbox_events(pool: &PgPool) -> Vec<(String, serde_json::Value, String)> {
    sqlx::query_as(
        "SELECT event_type, payload, status FROM payments_outbox_events ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .expect("Failed to query outbox")
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn create_account_is_idempotent_per_user() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let first = repo.create_account(7).await.unwrap();
    let second = repo.create_account(7).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.balance, 0);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE user_id = 7")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn deposit_updates_balance_and_ledger_together() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let account = repo.create_account(7).await.unwrap();
    let updated = repo.deposit(7, 500).await.unwrap();
    assert_eq!(updated.balance, 500);

    let updated = repo.deposit(7, 250).await.unwrap();
    assert_eq!(updated.balance, 750);

    // balance = sum of ledger rows, always
    assert_eq!(ledger_sum(&pool, account.id).await, 750);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn deposit_of_zero_is_a_recorded_noop() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let account = repo.create_account(7).await.unwrap();
    let updated = repo.deposit(7, 0).await.unwrap();

    assert_eq!(updated.balance, 0);
    let (rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM account_transactions WHERE account_id = $1")
            .bind(account.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 1, "zero deposit still writes its ledger row");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn deposit_without_account_is_not_found() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let result = repo.deposit(999, 100).await;
    assert!(matches!(
        result,
        Err(payments_rs::repository::AccountRepoError::NotFound)
    ));
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn successful_payment_debits_once_and_enqueues_success_event() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let account = repo.create_account(7).await.unwrap();
    repo.deposit(7, 500).await.unwrap();

    let event = OrderCreatedEvent {
        order_id: 42,
        user_id: 7,
        amount: 300,
    };
    let outcome = repo.apply_order_created(&event).await.unwrap();
    assert_eq!(outcome, PaymentOutcome::Decided(Decision::Approve));

    let updated = repo.get_by_user_id(7).await.unwrap();
    assert_eq!(updated.balance, 200);
    assert_eq!(ledger_sum(&pool, account.id).await, 200);

    let events = outbox_events(&pool).await;
    assert_eq!(events.len(), 1);
    let (event_type, payload, status) = &events[0];
    assert_eq!(event_type, "PaymentSucceeded");
    assert_eq!(status, "new");
    assert_eq!(payload["order_id"], 42);
    assert_eq!(payload["user_id"], 7);
    assert_eq!(payload["status"], "PaymentSucceeded");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn duplicate_delivery_applies_the_effect_exactly_once() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    repo.create_account(7).await.unwrap();
    repo.deposit(7, 500).await.unwrap();

    let event = OrderCreatedEvent {
        order_id: 42,
        user_id: 7,
        amount: 50,
    };

    let first = repo.apply_order_created(&event).await.unwrap();
    let second = repo.apply_order_created(&event).await.unwrap();

    assert_eq!(first, PaymentOutcome::Decided(Decision::Approve));
    assert_eq!(second, PaymentOutcome::AlreadyProcessed);

    // Debited once, not twice, and exactly one terminal event exists
    let account = repo.get_by_user_id(7).await.unwrap();
    assert_eq!(account.balance, 450);
    assert_eq!(outbox_events(&pool).await.len(), 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn insufficient_funds_declines_without_touching_the_balance() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    repo.create_account(8).await.unwrap();
    repo.deposit(8, 100).await.unwrap();

    let event = OrderCreatedEvent {
        order_id: 43,
        user_id: 8,
        amount: 150,
    };
    let outcome = repo.apply_order_created(&event).await.unwrap();
    assert_eq!(
        outcome,
        PaymentOutcome::Decided(Decision::Decline(DeclineReason::InsufficientFunds))
    );

    let account = repo.get_by_user_id(8).await.unwrap();
    assert_eq!(account.balance, 100);

    let events = outbox_events(&pool).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "PaymentFailed");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn missing_account_declines_and_creates_nothing() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    let event = OrderCreatedEvent {
        order_id: 44,
        user_id: 9,
        amount: 10,
    };
    let outcome = repo.apply_order_created(&event).await.unwrap();
    assert_eq!(
        outcome,
        PaymentOutcome::Decided(Decision::Decline(DeclineReason::NoAccount))
    );

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE user_id = 9")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "no account row may materialize");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn concurrent_payments_for_one_user_serialize_on_the_row_lock() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    repo.create_account(7).await.unwrap();
    repo.deposit(7, 100).await.unwrap();

    let first = OrderCreatedEvent {
        order_id: 50,
        user_id: 7,
        amount: 80,
    };
    let second = OrderCreatedEvent {
        order_id: 51,
        user_id: 7,
        amount: 80,
    };

    let (a, b) = tokio::join!(
        repo.apply_order_created(&first),
        repo.apply_order_created(&second)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let approvals = outcomes
        .iter()
        .filter(|o| matches!(o, PaymentOutcome::Decided(Decision::Approve)))
        .count();
    let declines = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                PaymentOutcome::Decided(Decision::Decline(DeclineReason::InsufficientFunds))
            )
        })
        .count();
    assert_eq!((approvals, declines), (1, 1));

    let account = repo.get_by_user_id(7).await.unwrap();
    assert_eq!(account.balance, 20);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres via DATABASE_URL
async fn outbox_relay_publishes_then_marks_processed() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let repo = AccountRepository::new(pool.clone());

    repo.create_account(7).await.unwrap();
    repo.deposit(7, 500).await.unwrap();
    repo.apply_order_created(&OrderCreatedEvent {
        order_id: 60,
        user_id: 7,
        amount: 100,
    })
    .await
    .unwrap();

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let mut results = bus.consume_queue(PAYMENTS_RESULTS_QUEUE).await.unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let relay = tokio::spawn(payments_rs::events::start_outbox_relay(
        pool.clone(),
        bus.clone(),
        cancel.clone(),
    ));

    let delivery = tokio::time::timeout(
        Duration::from_secs(10),
        futures::StreamExt::next(&mut results),
    )
    .await
    .expect("relay never published the outbox row")
    .expect("queue stream ended");
    assert_eq!(delivery.event_type.as_deref(), Some("PaymentSucceeded"));
    let body: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
    assert_eq!(body["order_id"], 60);
    delivery.ack().await.unwrap();

    // The row must reach processed shortly after the publish
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events = outbox_events(&pool).await;
        if events.iter().all(|(_, _, status)| status == "processed") {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "outbox row never marked processed"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    cancel.cancel();
    relay.await.unwrap();
}
