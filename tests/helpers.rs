#![allow(dead_code)]

use casino_settlement::config::{SettlementConfig, StoreBackend};
use casino_settlement::models::*;
use casino_settlement::repositories::{MemoryStore, SettlementStore};
use casino_settlement::services::{SettlementOrchestrator, StaticGameCatalog};
use casino_settlement::{AppConfig, AppState};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;

/// Platform suffix the provider appends to usernames in these tests
pub const SUFFIX: &str = "x7q";

/// In-memory store plus an orchestrator wired the way `main` wires it
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub config: SettlementConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SettlementConfig::default())
    }

    pub fn with_config(config: SettlementConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(
            StaticGameCatalog::new()
                .with_game("aviator", "Aviator")
                .with_game("slot-7", "Lucky Sevens"),
        );
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store.clone(),
            catalog,
            &config,
        ));
        Self {
            store,
            orchestrator,
            config,
        }
    }

    /// HTTP state over the same store and orchestrator
    pub fn app_state(&self) -> Arc<AppState> {
        let config = AppConfig {
            store: StoreBackend::Memory,
            settlement: self.config.clone(),
            ..AppConfig::default()
        };
        Arc::new(AppState::new(
            config,
            self.store.clone(),
            self.orchestrator.clone(),
        ))
    }

    pub async fn seed_account(&self, username: &str, balance: Decimal) -> Account {
        let account = Account::new(username).with_balance(balance);
        self.store
            .insert_account(&account)
            .await
            .expect("Failed to seed account");
        account
    }

    pub async fn seed_referred_account(
        &self,
        username: &str,
        balance: Decimal,
        affiliate_code: &str,
        deposit_pool: Decimal,
    ) -> Account {
        let account = Account::new(username)
            .with_balance(balance)
            .with_affiliate(affiliate_code, deposit_pool);
        self.store
            .insert_account(&account)
            .await
            .expect("Failed to seed account");
        account
    }

    pub async fn seed_affiliate(&self, code: &str, rate: Decimal) -> Affiliate {
        let affiliate = Affiliate::new(code, rate);
        self.store
            .insert_affiliate(&affiliate)
            .await
            .expect("Failed to seed affiliate");
        affiliate
    }

    pub async fn account(&self, account: &Account) -> Account {
        self.store
            .find_account(account.id)
            .await
            .expect("Failed to load account")
            .expect("Account missing")
    }

    pub async fn affiliate(&self, code: &str) -> Affiliate {
        self.store
            .find_affiliate_by_code(code)
            .await
            .expect("Failed to load affiliate")
            .expect("Affiliate missing")
    }

    pub async fn entries(&self, account: &Account) -> Vec<LedgerEntry> {
        self.store
            .entries_for_account(account.id)
            .await
            .expect("Failed to load entries")
    }

    pub async fn grants(&self, account: &Account) -> Vec<BonusGrant> {
        self.store
            .grants_for_account(account.id)
            .await
            .expect("Failed to load grants")
    }
}

pub fn dec(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

/// Current-shape provider callback for `username` (suffix added here)
pub fn game_callback(username: &str, bet_type: &str, amount: i64, txn: &str, game: &str) -> Value {
    json!({
        "username": format!("{}{}", username, SUFFIX),
        "provider_code": "JILI",
        "amount": amount,
        "game_code": game,
        "bet_type": bet_type,
        "transaction_id": txn,
    })
}

pub fn deposit_callback(identify_address: &str, amount: i64, trxid: &str) -> DepositCallback {
    serde_json::from_value(json!({
        "success": true,
        "userIdentifyAddress": identify_address,
        "amount": amount,
        "trxid": trxid,
    }))
    .expect("Failed to build deposit callback")
}
