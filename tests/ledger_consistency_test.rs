//! Ledger consistency checks
//!
//! The stored balance must always equal the opening balance plus the sum of
//! the user's entries, whatever the interleaving of writers. The same checks
//! run against Postgres when DATABASE_URL points at a migrated database.

use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use std::sync::Arc;

use workmarket_backend::services::credit_ledger::{
    CreditLedger, InMemoryCreditLedger, LedgerEntryType, LedgerError, NewLedgerEntry,
};

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

fn delta(user_id: i64, amount: &str, entry_type: LedgerEntryType) -> NewLedgerEntry {
    NewLedgerEntry::new(user_id, dec(amount), entry_type, "consistency check")
}

async fn assert_balance_matches_entries(
    ledger: &dyn CreditLedger,
    user_id: i64,
    opening: &BigDecimal,
) {
    let page = ledger.get_history(user_id, 1, 100).await.unwrap();
    let sum = page
        .entries
        .iter()
        .fold(BigDecimal::zero(), |acc, e| acc + &e.amount);

    assert_eq!(ledger.balance(user_id).await.unwrap(), opening + sum);
}

/// Concurrent credits and debits against one user
async fn exercise_concurrent_writers(ledger: Arc<dyn CreditLedger>, user_id: i64) {
    let opening = ledger.balance(user_id).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let entry = if i % 4 == 3 {
                delta(user_id, "-2.50", LedgerEntryType::Subscription)
            } else {
                delta(user_id, "5", LedgerEntryType::ReferralReward)
            };
            ledger.apply_delta(entry).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 15 credits of 5 and 5 debits of 2.50
    assert_eq!(
        ledger.balance(user_id).await.unwrap(),
        &opening + dec("62.50")
    );
    assert_balance_matches_entries(ledger.as_ref(), user_id, &opening).await;
}

/// Racing refills with one gateway reference produce one entry
async fn exercise_refill_dedupe(ledger: Arc<dyn CreditLedger>, user_id: i64, reference: &str) {
    let opening = ledger.balance(user_id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        let entry = delta(user_id, "40", LedgerEntryType::Refill)
            .with_reference(reference, "payment_gateway");
        handles.push(tokio::spawn(async move { ledger.apply_delta(entry).await }));
    }

    let mut credited = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => credited += 1,
            Err(LedgerError::DuplicateReference { existing }) => {
                assert_eq!(existing.reference_id.as_deref(), Some(reference));
                duplicates += 1;
            }
            Err(e) => panic!("unexpected ledger error: {}", e),
        }
    }

    assert_eq!(credited, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(ledger.balance(user_id).await.unwrap(), &opening + dec("40"));
}

#[tokio::test]
async fn test_in_memory_concurrent_writers() {
    let ledger: Arc<dyn CreditLedger> =
        Arc::new(InMemoryCreditLedger::new().with_user(1, dec("10")));
    exercise_concurrent_writers(ledger, 1).await;
}

#[tokio::test]
async fn test_in_memory_refill_dedupe() {
    let ledger: Arc<dyn CreditLedger> = Arc::new(InMemoryCreditLedger::new().with_user(1, dec("0")));
    exercise_refill_dedupe(ledger, 1, "PAY-77").await;
}

#[tokio::test]
async fn test_rejected_debit_leaves_no_trace() {
    let ledger = InMemoryCreditLedger::new().with_user(1, dec("3"));

    let result = ledger
        .apply_delta(delta(1, "-5", LedgerEntryType::Subscription))
        .await;
    assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));

    assert_eq!(ledger.balance(1).await.unwrap(), dec("3"));
    assert!(ledger.entries_for(1).await.is_empty());
    assert_balance_matches_entries(&ledger, 1, &dec("3")).await;
}

#[tokio::test]
async fn test_non_refill_references_may_repeat() {
    let ledger = InMemoryCreditLedger::new().with_user(1, dec("0"));

    for _ in 0..2 {
        ledger
            .apply_delta(
                delta(1, "1", LedgerEntryType::ReferralBonus).with_reference("user-9", "referral"),
            )
            .await
            .unwrap();
    }

    assert_eq!(ledger.balance(1).await.unwrap(), dec("2"));
}

#[tokio::test]
async fn test_history_is_isolated_and_paginated() {
    let ledger = InMemoryCreditLedger::new()
        .with_user(1, dec("0"))
        .with_user(2, dec("0"));

    for i in 1..=5 {
        ledger
            .apply_delta(delta(1, &i.to_string(), LedgerEntryType::Adjustment))
            .await
            .unwrap();
    }
    ledger
        .apply_delta(delta(2, "100", LedgerEntryType::Adjustment))
        .await
        .unwrap();

    let first = ledger.get_history(1, 1, 2).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.entries.len(), 2);
    assert_eq!(first.entries[0].amount, dec("5"));
    assert_eq!(first.entries[1].amount, dec("4"));

    let last = ledger.get_history(1, 3, 2).await.unwrap();
    assert_eq!(last.entries.len(), 1);
    assert_eq!(last.entries[0].amount, dec("1"));

    let beyond = ledger.get_history(1, 9, 2).await.unwrap();
    assert!(beyond.entries.is_empty());
    assert_eq!(beyond.total, 5);

    let other = ledger.get_history(2, 1, 20).await.unwrap();
    assert_eq!(other.total, 1);
}

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use workmarket_backend::database::{
        credit_ledger_repository::CreditLedgerRepository, init_pool, run_migrations,
    };

    async fn ledger_with_user() -> (Arc<dyn CreditLedger>, i64) {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/workmarket_test".to_string());
        let pool = init_pool(&database_url, None)
            .await
            .expect("Failed to create test database pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let user_id: i64 =
            sqlx::query_scalar("INSERT INTO users (credit_balance) VALUES (10) RETURNING id")
                .fetch_one(&pool)
                .await
                .unwrap();

        (Arc::new(CreditLedgerRepository::new(pool)), user_id)
    }

    #[tokio::test]
    #[ignore] // Requires a Postgres database
    async fn test_postgres_concurrent_writers() {
        let (ledger, user_id) = ledger_with_user().await;
        exercise_concurrent_writers(ledger, user_id).await;
    }

    #[tokio::test]
    #[ignore] // Requires a Postgres database
    async fn test_postgres_refill_dedupe() {
        let (ledger, user_id) = ledger_with_user().await;
        let reference = format!("PAY-{}", uuid::Uuid::new_v4());
        exercise_refill_dedupe(ledger, user_id, &reference).await;
    }
}
