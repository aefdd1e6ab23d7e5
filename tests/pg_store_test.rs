//! Runs against a live Postgres (`DATABASE_URL`); ignored by default.
//! `cargo test -- --ignored` with a database available.

use casino_settlement::config::SettlementConfig;
use casino_settlement::error::{RepositoryError, SettlementError};
use casino_settlement::models::*;
use casino_settlement::repositories::{AccountUpdate, PgStore, SettlementStore};
use casino_settlement::services::{SettlementOrchestrator, StaticGameCatalog};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

fn dec(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stale_version_is_rejected(pool: PgPool) {
    let store = PgStore::new(pool);
    let account = Account::new("pg_cas").with_balance(dec(100));
    store.insert_account(&account).await.unwrap();

    let mut first = AccountUpdate::new(account.clone());
    first.account.balance = dec(90);
    store.commit_account_update(&first).await.unwrap();

    // Same expected version again: someone else already moved it on
    let mut stale = AccountUpdate::new(account.clone());
    stale.account.balance = dec(80);
    let err = store.commit_account_update(&stale).await.unwrap_err();
    assert!(matches!(err, RepositoryError::VersionConflict(_)));

    let stored = store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.balance, dec(90));
    assert_eq!(stored.version, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_orchestrator_on_postgres(pool: PgPool) {
    let store: Arc<dyn SettlementStore> = Arc::new(PgStore::new(pool));
    let orchestrator = SettlementOrchestrator::new(
        store.clone(),
        Arc::new(StaticGameCatalog::new()),
        &SettlementConfig::default(),
    );

    let account = Account::new("pg_player").with_balance(dec(1000));
    store.insert_account(&account).await.unwrap();

    let bet = json!({
        "username": "pg_playerabc",
        "amount": 250,
        "game_code": "slot-7",
        "bet_type": "BET",
        "transaction_id": "PG-1",
    });
    let receipt = orchestrator.handle_game_callback(bet.clone()).await.unwrap();
    assert_eq!(receipt.balance, dec(750));

    let err = orchestrator.handle_game_callback(bet).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::DuplicateTransaction { balance_after, .. } if balance_after == dec(750)
    ));

    let settle = json!({
        "username": "pg_playerabc",
        "amount": 400,
        "game_code": "slot-7",
        "bet_type": "SETTLE",
        "transaction_id": "PG-2",
    });
    let receipt = orchestrator.handle_game_callback(settle).await.unwrap();
    assert!(receipt.settle.unwrap().paired);
    assert_eq!(receipt.balance, dec(1150));

    let replay = orchestrator.ledger_replay(account.id).await.unwrap();
    assert_eq!(replay.entries, 2);
    assert!(replay.consistent);
}
