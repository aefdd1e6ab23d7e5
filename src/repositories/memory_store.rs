//! In-process store with the same uniqueness and version semantics as the
//! Postgres schema. Backs the test-suite and `STORE=memory` development runs.

use super::store::{AccountSnapshot, AccountUpdate, CommissionUpdate, SettlementStore};
use crate::error::RepositoryError;
use crate::models::{
    Account, Affiliate, BonusGrant, BonusStatus, CommissionRecord, EntryKind, LedgerEntry,
    PendingDeposit, PendingDepositStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    entries: Vec<LedgerEntry>,
    entry_keys: HashMap<String, usize>,
    grants: HashMap<Uuid, BonusGrant>,
    pending_deposits: HashMap<Uuid, PendingDeposit>,
    affiliates: HashMap<Uuid, Affiliate>,
    commissions: Vec<CommissionRecord>,
    commission_keys: HashMap<String, usize>,
    next_seq: i64,
    injected_conflicts: u32,
    injected_commission_conflicts: u32,
    hidden_entry_reads: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` account commits fail their version check, as if
    /// another writer had got there first.
    pub async fn inject_version_conflicts(&self, count: u32) {
        self.state.lock().await.injected_conflicts = count;
    }

    /// Make the next `count` commission commits fail their version check
    pub async fn inject_commission_conflicts(&self, count: u32) {
        self.state.lock().await.injected_commission_conflicts = count;
    }

    /// Make the next `count` key lookups miss, as if the writer's transaction
    /// were not visible yet
    pub async fn hide_entries(&self, count: u32) {
        self.state.lock().await.hidden_entry_reads = count;
    }

    /// Number of ledger entries across all accounts
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

fn check_version(stored: &Account, expected: i64) -> Result<(), RepositoryError> {
    if stored.version != expected {
        return Err(RepositoryError::VersionConflict(format!(
            "account {} at version {}, expected {}",
            stored.id, stored.version, expected
        )));
    }
    Ok(())
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let taken = state.accounts.values().any(|a| {
            a.id == account.id
                || a.username == account.username
                || (a.player_id.is_some() && a.player_id == account.player_id)
        });
        if taken {
            return Err(RepositoryError::Duplicate(format!(
                "account {} / {}",
                account.id, account.username
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.accounts.values().find(|a| a.username == username).cloned())
    }

    async fn find_account_by_player_id(
        &self,
        player_id: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.player_id.as_deref() == Some(player_id))
            .cloned())
    }

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<Account>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn load_snapshot(
        &self,
        account_id: Uuid,
    ) -> Result<Option<AccountSnapshot>, RepositoryError> {
        let state = self.state.lock().await;
        let Some(account) = state.accounts.get(&account_id).cloned() else {
            return Ok(None);
        };
        let mut active_grants: Vec<BonusGrant> = state
            .grants
            .values()
            .filter(|g| g.account_id == account_id && g.status == BonusStatus::Active)
            .cloned()
            .collect();
        active_grants.sort_by_key(|g| g.created_at);
        Ok(Some(AccountSnapshot {
            account,
            active_grants,
        }))
    }

    async fn commit_account_update(&self, update: &AccountUpdate) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;

        if let Some(entry) = &update.entry {
            if state.entry_keys.contains_key(&entry.external_key) {
                return Err(RepositoryError::Duplicate(entry.external_key.clone()));
            }
        }

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(RepositoryError::VersionConflict("injected".to_string()));
        }

        let stored = state
            .accounts
            .get(&update.account.id)
            .ok_or_else(|| RepositoryError::NotFound(update.account.id.to_string()))?;
        check_version(stored, update.expected_version())?;

        if update.account.balance.is_sign_negative() && !update.account.balance.is_zero() {
            return Err(RepositoryError::ConstraintViolation("balance >= 0".to_string()));
        }
        if update.account.bonus_balance.is_sign_negative() && !update.account.bonus_balance.is_zero()
        {
            return Err(RepositoryError::ConstraintViolation("bonus_balance >= 0".to_string()));
        }

        let mut account = update.account.clone();
        account.version += 1;
        account.updated_at = Utc::now();
        state.accounts.insert(account.id, account);

        if let Some(entry) = &update.entry {
            let mut entry = entry.clone();
            state.next_seq += 1;
            entry.seq = state.next_seq;
            let index = state.entries.len();
            state.entry_keys.insert(entry.external_key.clone(), index);
            state.entries.push(entry);
        }

        for grant in update.grant_updates.iter().chain(update.new_grants.iter()) {
            state.grants.insert(grant.id, grant.clone());
        }

        if let Some((id, status)) = update.pending_deposit {
            if let Some(deposit) = state.pending_deposits.get_mut(&id) {
                deposit.status = status;
            }
        }

        Ok(())
    }

    async fn find_entry(&self, external_key: &str) -> Result<Option<LedgerEntry>, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.hidden_entry_reads > 0 {
            state.hidden_entry_reads -= 1;
            return Ok(None);
        }
        Ok(state
            .entry_keys
            .get(external_key)
            .and_then(|i| state.entries.get(*i))
            .cloned())
    }

    async fn find_latest_bet(
        &self,
        account_id: Uuid,
        game_code: &str,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| {
                e.account_id == account_id
                    && e.kind == EntryKind::Bet
                    && e.game_code.as_deref() == Some(game_code)
            })
            .max_by_key(|e| (e.created_at, e.seq))
            .cloned())
    }

    async fn entries_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn find_grant(&self, id: Uuid) -> Result<Option<BonusGrant>, RepositoryError> {
        Ok(self.state.lock().await.grants.get(&id).cloned())
    }

    async fn grants_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<BonusGrant>, RepositoryError> {
        let state = self.state.lock().await;
        let mut grants: Vec<BonusGrant> = state
            .grants
            .values()
            .filter(|g| g.account_id == account_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.created_at);
        Ok(grants)
    }

    async fn accounts_with_expired_grants(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<Uuid> = state
            .grants
            .values()
            .filter(|g| g.is_expired_at(now))
            .map(|g| g.account_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn insert_pending_deposit(
        &self,
        deposit: &PendingDeposit,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(&deposit.account_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "pending deposit references unknown account {}",
                deposit.account_id
            )));
        }
        state.pending_deposits.insert(deposit.id, deposit.clone());
        Ok(())
    }

    async fn find_pending_deposit(
        &self,
        trxid: &str,
        identify_address: &str,
    ) -> Result<Option<PendingDeposit>, RepositoryError> {
        let state = self.state.lock().await;
        let pending: Vec<&PendingDeposit> = state
            .pending_deposits
            .values()
            .filter(|d| d.status == PendingDepositStatus::Pending)
            .collect();
        if let Some(by_trxid) = pending.iter().find(|d| d.trxid.as_deref() == Some(trxid)) {
            return Ok(Some((*by_trxid).clone()));
        }
        Ok(pending
            .into_iter()
            .filter(|d| d.identify_address == identify_address)
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn set_pending_deposit_status(
        &self,
        id: Uuid,
        status: PendingDepositStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let deposit = state
            .pending_deposits
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("pending deposit {}", id)))?;
        deposit.status = status;
        Ok(())
    }

    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.affiliates.values().any(|a| a.code == affiliate.code) {
            return Err(RepositoryError::Duplicate(affiliate.code.clone()));
        }
        state.affiliates.insert(affiliate.id, affiliate.clone());
        Ok(())
    }

    async fn find_affiliate_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Affiliate>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.affiliates.values().find(|a| a.code == code).cloned())
    }

    async fn find_commission(
        &self,
        source_key: &str,
    ) -> Result<Option<CommissionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .commission_keys
            .get(source_key)
            .and_then(|i| state.commissions.get(*i))
            .cloned())
    }

    async fn commissions_for_affiliate(
        &self,
        affiliate_id: Uuid,
    ) -> Result<Vec<CommissionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.affiliate_id == affiliate_id)
            .cloned()
            .collect())
    }

    async fn commit_commission(&self, update: &CommissionUpdate) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;

        if state.commission_keys.contains_key(&update.record.source_key) {
            return Err(RepositoryError::Duplicate(update.record.source_key.clone()));
        }

        if state.injected_commission_conflicts > 0 {
            state.injected_commission_conflicts -= 1;
            return Err(RepositoryError::VersionConflict("injected".to_string()));
        }

        let account = state
            .accounts
            .get(&update.account_id)
            .ok_or_else(|| RepositoryError::NotFound(update.account_id.to_string()))?;
        check_version(account, update.expected_account_version)?;

        let affiliate = state
            .affiliates
            .get(&update.affiliate.id)
            .ok_or_else(|| RepositoryError::NotFound(update.affiliate.id.to_string()))?;
        if affiliate.version != update.affiliate.version {
            return Err(RepositoryError::VersionConflict(format!(
                "affiliate {} at version {}, expected {}",
                affiliate.id, affiliate.version, update.affiliate.version
            )));
        }

        if update.new_deposit_pool.is_sign_negative() && !update.new_deposit_pool.is_zero() {
            return Err(RepositoryError::ConstraintViolation(
                "affiliate_deposit_pool >= 0".to_string(),
            ));
        }

        let now = Utc::now();
        if let Some(account) = state.accounts.get_mut(&update.account_id) {
            account.affiliate_deposit_pool = update.new_deposit_pool;
            account.version += 1;
            account.updated_at = now;
        }

        let mut affiliate = update.affiliate.clone();
        affiliate.version += 1;
        affiliate.updated_at = now;
        state.affiliates.insert(affiliate.id, affiliate);

        let index = state.commissions.len();
        state
            .commission_keys
            .insert(update.record.source_key.clone(), index);
        state.commissions.push(update.record.clone());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_commit_rejects_stale_version() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let account = Account::new("stale").with_balance(Decimal::new(100, 0));
            store.insert_account(&account).await.unwrap();

            let first = AccountUpdate::new(account.clone());
            store.commit_account_update(&first).await.unwrap();

            // Same read version again: the row has moved on
            let second = AccountUpdate::new(account);
            let err = store.commit_account_update(&second).await.unwrap_err();
            assert!(matches!(err, RepositoryError::VersionConflict(_)));
        });
    }

    #[test]
    fn test_commit_rejects_duplicate_key() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let account = Account::new("dup").with_balance(Decimal::new(100, 0));
            store.insert_account(&account).await.unwrap();

            let mut update = AccountUpdate::new(account.clone());
            update.entry = Some(LedgerEntry::new(
                account.id,
                EntryKind::Deposit,
                Decimal::new(10, 0),
                account.balance,
                "K1",
            ));
            store.commit_account_update(&update).await.unwrap();

            let mut again = update.clone();
            again.account.version = 1;
            let err = store.commit_account_update(&again).await.unwrap_err();
            assert!(matches!(err, RepositoryError::Duplicate(_)));
            assert_eq!(store.entry_count().await, 1);
        });
    }
}
