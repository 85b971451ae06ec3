//! Payment decision engine
//!
//! The decision is a pure function of the row-locked balance and the
//! requested amount; the repository applies its side effects inside the same
//! transaction that held the lock.

use serde::Serialize;

/// Why a payment was declined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// No account exists for the requesting user
    NoAccount,
    /// The locked balance is smaller than the requested amount
    InsufficientFunds,
    /// The requested amount is zero or negative; fail closed
    MalformedAmount,
}

/// Outcome of evaluating one payment request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline(DeclineReason),
}

/// Decide a payment given the account balance under lock (`None` when the
/// user has no account) and the requested amount.
pub fn decide(balance: Option<i64>, amount: i64) -> Decision {
    if amount <= 0 {
        return Decision::Decline(DeclineReason::MalformedAmount);
    }
    match balance {
        None => Decision::Decline(DeclineReason::NoAccount),
        Some(balance) if balance < amount => Decision::Decline(DeclineReason::InsufficientFunds),
        Some(_) => Decision::Approve,
    }
}
