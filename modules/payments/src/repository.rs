use sqlx::{PgPool, Postgres, Transaction};

use crate::decision::{self, Decision};
use crate::events::enqueue_event;
use crate::models::{Account, OrderCreatedEvent, PaymentResultEvent, PaymentStatus, ORDER_CREATED};

#[derive(Debug, thiserror::Error)]
pub enum AccountRepoError {
    #[error("account not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outcome of consuming one OrderCreated event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The order id was already in the inbox table; nothing was applied
    AlreadyProcessed,
    /// The decision was applied and a terminal event enqueued
    Decided(Decision),
}

/// All account state lives behind this repository. Balance mutations happen
/// only inside a transaction that row-locked the account, and every mutation
/// appends the matching ledger row before commit.
#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an account with zero balance. Idempotent: a second create for
    /// the same user returns the existing account.
    pub async fn create_account(&self, user_id: i64) -> Result<Account, AccountRepoError> {
        let created: Option<Account> = sqlx::query_as(
            r#"
            INSERT INTO accounts (user_id, balance)
            VALUES ($1, 0)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING id, user_id, balance, created_at
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match created {
            Some(account) => Ok(account),
            None => self.get_by_user_id(user_id).await,
        }
    }

    pub async fn get_by_user_id(&self, user_id: i64) -> Result<Account, AccountRepoError> {
        sqlx::query_as(
            "SELECT id, user_id, balance, created_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AccountRepoError::NotFound)
    }

    /// Credit an account. The caller has already rejected negative amounts;
    /// a zero deposit still writes its 0 ledger row so the ledger stays the
    /// complete history of balance changes.
    pub async fn deposit(&self, user_id: i64, amount: i64) -> Result<Account, AccountRepoError> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, balance FROM accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (account_id, _) = locked.ok_or(AccountRepoError::NotFound)?;

        sqlx::query("UPDATE accounts SET balance = balance + $1 WHERE id = $2")
            .bind(amount)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        append_ledger_row(&mut tx, account_id, amount).await?;

        let account: Account = sqlx::query_as(
            "SELECT id, user_id, balance, created_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(account)
    }

    /// Apply one OrderCreated event: dedup, decide under the row lock, debit
    /// on approval, and enqueue the terminal reply, all in one transaction.
    ///
    /// Redelivery of an already-applied order commits an empty transaction,
    /// which is what makes the consumer's effect exactly-once.
    pub async fn apply_order_created(
        &self,
        event: &OrderCreatedEvent,
    ) -> Result<PaymentOutcome, AccountRepoError> {
        let mut tx = self.pool.begin().await?;

        let payload =
            serde_json::to_value(event).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments_inbox_messages (message_id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(event.order_id.to_string())
        .bind(ORDER_CREATED)
        .bind(&payload)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.commit().await?;
            return Ok(PaymentOutcome::AlreadyProcessed);
        }

        let locked: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, balance FROM accounts WHERE user_id = $1 FOR UPDATE")
                .bind(event.user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let decision = decision::decide(locked.map(|(_, balance)| balance), event.amount);

        if let (Decision::Approve, Some((account_id, _))) = (decision, locked) {
            sqlx::query("UPDATE accounts SET balance = balance - $1 WHERE id = $2")
                .bind(event.amount)
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
            append_ledger_row(&mut tx, account_id, -event.amount).await?;
        }

        let status = match decision {
            Decision::Approve => PaymentStatus::PaymentSucceeded,
            Decision::Decline(_) => PaymentStatus::PaymentFailed,
        };
        let reply = PaymentResultEvent {
            order_id: event.order_id,
            user_id: event.user_id,
            status,
        };
        let reply_payload =
            serde_json::to_value(&reply).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        enqueue_event(&mut tx, status.as_str(), &reply_payload).await?;

        tx.commit().await?;
        Ok(PaymentOutcome::Decided(decision))
    }
}

async fn append_ledger_row(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    amount: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO account_transactions (account_id, amount) VALUES ($1, $2)")
        .bind(account_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
