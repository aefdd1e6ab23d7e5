use crate::error::{RepositoryError, SettlementError};
use crate::models::LedgerEntry;
use crate::repositories::SettlementStore;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Ledger key for an external event, scoped by the system that issued it.
///
/// Provider transaction ids, gateway trxids and withdrawal request ids come
/// from independent id spaces; only the scoped form is stored and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnKey {
    scoped: String,
    external_id: String,
}

impl TxnKey {
    /// `game:{provider}:{transaction_id}`, `-` when the provider is absent
    pub fn game(provider_code: Option<&str>, transaction_id: &str) -> Self {
        let provider = provider_code
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("-");
        Self {
            scoped: format!("game:{}:{}", provider, transaction_id),
            external_id: transaction_id.to_string(),
        }
    }

    pub fn deposit(trxid: &str) -> Self {
        Self {
            scoped: format!("deposit:{}", trxid),
            external_id: trxid.to_string(),
        }
    }

    /// Player-chosen request ids are only unique per account
    pub fn withdrawal(account_id: Uuid, request_id: &str) -> Self {
        Self {
            scoped: format!("withdrawal:{}:{}", account_id, request_id),
            external_id: request_id.to_string(),
        }
    }

    /// Stored form, unique across the ledger
    pub fn as_str(&self) -> &str {
        &self.scoped
    }

    /// Id as the issuing system sent it
    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

impl fmt::Display for TxnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scoped)
    }
}

/// Result of checking an external transaction key
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    /// Key already maps to this entry
    Duplicate(LedgerEntry),
}

/// Exactly-once gate keyed on the scoped transaction key.
///
/// `admit` is only a fast path. The authoritative check is the unique
/// constraint on the ledger key, hit when the entry is inserted in the same
/// unit of work as the balance write; `collision` turns that failure back into
/// a duplicate outcome.
pub struct IdempotencyGuard {
    store: Arc<dyn SettlementStore>,
}

/// Re-reads of a collided key before falling back to the live balance
const COLLISION_REREADS: usize = 2;

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    pub async fn admit(&self, key: &TxnKey) -> Result<Admission, RepositoryError> {
        match self.store.find_entry(key.as_str()).await? {
            Some(entry) => Ok(Admission::Duplicate(entry)),
            None => Ok(Admission::Admitted),
        }
    }

    /// Fail fast if `key` is already recorded. Only the owning account gets
    /// `DuplicateTransaction` back.
    pub async fn ensure_unseen(&self, key: &TxnKey, account_id: Uuid) -> Result<(), SettlementError> {
        match self.admit(key).await? {
            Admission::Admitted => Ok(()),
            Admission::Duplicate(entry) => Err(duplicate_of(key, account_id, &entry)),
        }
    }

    /// Resolve a unique-key collision raised while inserting the entry
    pub async fn collision(&self, key: &TxnKey, account_id: Uuid) -> SettlementError {
        for _ in 0..COLLISION_REREADS {
            match self.store.find_entry(key.as_str()).await {
                Ok(Some(entry)) => return duplicate_of(key, account_id, &entry),
                Ok(None) => tokio::task::yield_now().await,
                Err(e) => return SettlementError::Repository(e),
            }
        }

        // Winner's transaction still not visible; report where the account stands now
        warn!("Key {} collided but the winning entry is not visible", key);
        match self.store.find_account(account_id).await {
            Ok(Some(account)) => SettlementError::DuplicateTransaction {
                key: key.external_id().to_string(),
                balance_after: account.balance,
            },
            Ok(None) => SettlementError::AccountNotFound(account_id.to_string()),
            Err(e) => SettlementError::Repository(e),
        }
    }
}

/// Outcome for an event whose key is already in the ledger
pub fn duplicate_of(key: &TxnKey, account_id: Uuid, entry: &LedgerEntry) -> SettlementError {
    if entry.account_id != account_id {
        warn!(
            "Key {} is recorded against account {}, not {}",
            key, entry.account_id, account_id
        );
        return SettlementError::Validation(format!(
            "Transaction {} is recorded against another account",
            key.external_id()
        ));
    }
    SettlementError::DuplicateTransaction {
        key: key.external_id().to_string(),
        balance_after: entry.balance_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, EntryKind};
    use crate::repositories::{AccountUpdate, MemoryStore};
    use rust_decimal::Decimal;

    async fn store_with_entry(key: &TxnKey) -> (Arc<MemoryStore>, Account) {
        let store = Arc::new(MemoryStore::new());
        let account = Account::new("rahim01").with_balance(Decimal::new(100, 0));
        store.insert_account(&account).await.unwrap();

        let mut update = AccountUpdate::new(account.clone());
        update.account.balance = Decimal::new(150, 0);
        update.entry = Some(LedgerEntry::new(
            account.id,
            EntryKind::Deposit,
            Decimal::new(50, 0),
            Decimal::new(100, 0),
            key.as_str(),
        ));
        store.commit_account_update(&update).await.unwrap();
        (store, account)
    }

    #[test]
    fn test_keys_are_scoped_by_source() {
        let account = Uuid::new_v4();
        assert_eq!(TxnKey::game(Some("JILI"), "777").as_str(), "game:JILI:777");
        assert_eq!(TxnKey::game(None, "777").as_str(), "game:-:777");
        assert_eq!(TxnKey::deposit("777").as_str(), "deposit:777");
        assert_eq!(
            TxnKey::withdrawal(account, "777").as_str(),
            format!("withdrawal:{}:777", account)
        );
        assert_ne!(TxnKey::game(Some("JILI"), "777"), TxnKey::deposit("777"));
        assert_eq!(TxnKey::deposit("777").external_id(), "777");
    }

    #[test]
    fn test_admit_reports_existing_entry() {
        tokio_test::block_on(async {
            let key = TxnKey::deposit("TXN1");
            let store = Arc::new(MemoryStore::new());
            let guard = IdempotencyGuard::new(store.clone());
            assert_eq!(guard.admit(&key).await.unwrap(), Admission::Admitted);

            let (store, account) = store_with_entry(&key).await;
            let guard = IdempotencyGuard::new(store.clone());
            match guard.admit(&key).await.unwrap() {
                Admission::Duplicate(entry) => assert_eq!(entry.balance_after, Decimal::new(150, 0)),
                other => panic!("expected duplicate, got {:?}", other),
            }

            // Same raw id from another source is unrelated
            let other = TxnKey::game(Some("JILI"), "TXN1");
            assert_eq!(guard.admit(&other).await.unwrap(), Admission::Admitted);

            match guard.ensure_unseen(&key, account.id).await.unwrap_err() {
                SettlementError::DuplicateTransaction { key, balance_after } => {
                    assert_eq!(key, "TXN1");
                    assert_eq!(balance_after, Decimal::new(150, 0));
                }
                other => panic!("expected duplicate, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_foreign_owner_does_not_see_balance() {
        tokio_test::block_on(async {
            let key = TxnKey::deposit("TXN1");
            let (store, _) = store_with_entry(&key).await;
            let guard = IdempotencyGuard::new(store);

            let err = guard.ensure_unseen(&key, Uuid::new_v4()).await.unwrap_err();
            assert!(matches!(err, SettlementError::Validation(_)));
            assert!(!err.to_string().contains("150"));
        });
    }

    #[test]
    fn test_invisible_winner_reports_live_balance() {
        tokio_test::block_on(async {
            let key = TxnKey::deposit("TXN1");
            let (store, account) = store_with_entry(&key).await;
            store.hide_entries(COLLISION_REREADS as u32).await;

            let guard = IdempotencyGuard::new(store.clone());
            match guard.collision(&key, account.id).await {
                SettlementError::DuplicateTransaction { balance_after, .. } => {
                    assert_eq!(balance_after, Decimal::new(150, 0));
                }
                other => panic!("expected duplicate, got {:?}", other),
            }
        });
    }
}
