use super::idempotency::{IdempotencyGuard, TxnKey};
use crate::error::{RepositoryError, SettlementError, SettlementResult};
use crate::models::{Account, BonusGrant, EntryKind, LedgerEntry};
use crate::repositories::{AccountSnapshot, AccountUpdate, SettlementStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One monetary event to post against an account
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: EntryKind,
    /// Debits are negative
    pub signed_amount: Decimal,
    pub key: TxnKey,
    pub game_code: Option<String>,
    pub provider_code: Option<String>,
}

impl Mutation {
    pub fn new(kind: EntryKind, signed_amount: Decimal, key: TxnKey) -> Self {
        Self {
            kind,
            signed_amount,
            key,
            game_code: None,
            provider_code: None,
        }
    }

    pub fn debit(kind: EntryKind, amount: Decimal, key: TxnKey) -> Self {
        Self::new(kind, -amount, key)
    }

    pub fn credit(kind: EntryKind, amount: Decimal, key: TxnKey) -> Self {
        Self::new(kind, amount, key)
    }

    pub fn with_game(mut self, game_code: Option<String>, provider_code: Option<String>) -> Self {
        self.game_code = game_code;
        self.provider_code = provider_code;
        self
    }
}

/// State committed by a successful unit of work
#[derive(Debug, Clone)]
pub struct Applied {
    /// Account as stored after the commit
    pub account: Account,
    pub entry: Option<LedgerEntry>,
    pub grant_updates: Vec<BonusGrant>,
    pub new_grants: Vec<BonusGrant>,
    pub attempts: u32,
}

/// Outcome of a single optimistic attempt
enum Attempt {
    Committed(Applied),
    Conflict,
}

/// Single writer of account balances.
///
/// Every call reads a fresh snapshot, builds the whole unit of work (balance,
/// ledger entry and whatever the `effects` closure stages), and commits it
/// under a version check. A lost race re-runs the attempt from a fresh read,
/// up to `max_attempts` times.
pub struct BalanceLedger {
    store: Arc<dyn SettlementStore>,
    guard: Arc<IdempotencyGuard>,
    max_attempts: u32,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn SettlementStore>, guard: Arc<IdempotencyGuard>, max_attempts: u32) -> Self {
        Self {
            store,
            guard,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Post `mutation` and run `effects` in the same unit of work.
    ///
    /// `effects` sees the update with the new balance already set and may
    /// reject the event; it must not change `balance`.
    pub async fn apply<F>(
        &self,
        account_id: Uuid,
        mutation: &Mutation,
        effects: F,
    ) -> SettlementResult<Applied>
    where
        F: FnMut(&mut AccountUpdate, &AccountSnapshot) -> SettlementResult<()> + Send,
    {
        self.run(account_id, Some(mutation), effects).await
    }

    /// Version-checked account update with no ledger entry (bonus balance,
    /// expiry, admin grants)
    pub async fn update<F>(&self, account_id: Uuid, effects: F) -> SettlementResult<Applied>
    where
        F: FnMut(&mut AccountUpdate, &AccountSnapshot) -> SettlementResult<()> + Send,
    {
        self.run(account_id, None, effects).await
    }

    async fn run<F>(
        &self,
        account_id: Uuid,
        mutation: Option<&Mutation>,
        mut effects: F,
    ) -> SettlementResult<Applied>
    where
        F: FnMut(&mut AccountUpdate, &AccountSnapshot) -> SettlementResult<()> + Send,
    {
        for attempt in 1..=self.max_attempts {
            match self.attempt(account_id, mutation, &mut effects).await? {
                Attempt::Committed(mut applied) => {
                    applied.attempts = attempt;
                    return Ok(applied);
                }
                Attempt::Conflict => {
                    debug!(
                        "Version conflict on account {} (attempt {}/{})",
                        account_id, attempt, self.max_attempts
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(
            "Giving up on account {} after {} attempts",
            account_id, self.max_attempts
        );
        Err(SettlementError::ConcurrentModification {
            attempts: self.max_attempts,
        })
    }

    async fn attempt<F>(
        &self,
        account_id: Uuid,
        mutation: Option<&Mutation>,
        effects: &mut F,
    ) -> SettlementResult<Attempt>
    where
        F: FnMut(&mut AccountUpdate, &AccountSnapshot) -> SettlementResult<()> + Send,
    {
        if let Some(m) = mutation {
            self.guard.ensure_unseen(&m.key, account_id).await?;
        }

        let snapshot = self
            .store
            .load_snapshot(account_id)
            .await?
            .ok_or_else(|| SettlementError::AccountNotFound(account_id.to_string()))?;

        let balance_before = snapshot.account.balance;
        let mut update = AccountUpdate::new(snapshot.account.clone());
        if let Some(m) = mutation {
            update.account.balance = balance_before + m.signed_amount;
        }

        effects(&mut update, &snapshot)?;

        let balance_after = update.account.balance;
        if balance_after < Decimal::ZERO {
            return Err(SettlementError::InsufficientFunds {
                balance: balance_before,
                required: balance_before - balance_after,
                deficit: -balance_after,
            });
        }

        if let Some(m) = mutation {
            let entry = LedgerEntry::new(
                account_id,
                m.kind,
                balance_after - balance_before,
                balance_before,
                m.key.as_str(),
            )
            .with_game(m.game_code.clone(), m.provider_code.clone());
            update.entry = Some(entry);
        }

        match self.store.commit_account_update(&update).await {
            Ok(()) => {
                let mut account = update.account;
                account.version += 1;
                Ok(Attempt::Committed(Applied {
                    account,
                    entry: update.entry,
                    grant_updates: update.grant_updates,
                    new_grants: update.new_grants,
                    attempts: 0,
                }))
            }
            Err(RepositoryError::VersionConflict(_)) => Ok(Attempt::Conflict),
            Err(RepositoryError::Duplicate(reason)) => match mutation {
                Some(m) => Err(self.guard.collision(&m.key, account_id).await),
                None => Err(RepositoryError::Duplicate(reason).into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;

    fn ledger_with(balance: i64) -> (Arc<MemoryStore>, BalanceLedger, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let account = Account::new("tanvir55").with_balance(Decimal::new(balance, 0));
        let id = account.id;
        tokio_test::block_on(store.insert_account(&account)).unwrap();
        let guard = Arc::new(IdempotencyGuard::new(store.clone()));
        let ledger = BalanceLedger::new(store.clone(), guard, 3);
        (store, ledger, id)
    }

    fn no_effects(_: &mut AccountUpdate, _: &AccountSnapshot) -> SettlementResult<()> {
        Ok(())
    }

    #[test]
    fn test_apply_writes_entry_with_before_and_after() {
        let (_, ledger, id) = ledger_with(1000);
        let applied = tokio_test::block_on(ledger.apply(
            id,
            &Mutation::debit(EntryKind::Bet, Decimal::new(250, 0), TxnKey::game(None, "B-1")),
            no_effects,
        ))
        .unwrap();

        let entry = applied.entry.unwrap();
        assert_eq!(entry.balance_before, Decimal::new(1000, 0));
        assert_eq!(entry.balance_after, Decimal::new(750, 0));
        assert_eq!(entry.amount, Decimal::new(-250, 0));
        assert_eq!(applied.account.balance, Decimal::new(750, 0));
        assert_eq!(applied.account.version, 1);
    }

    #[test]
    fn test_overdraw_is_rejected_without_entry() {
        let (store, ledger, id) = ledger_with(300);
        let err = tokio_test::block_on(ledger.apply(
            id,
            &Mutation::debit(EntryKind::Bet, Decimal::new(500, 0), TxnKey::game(None, "B-2")),
            no_effects,
        ))
        .unwrap_err();

        match err {
            SettlementError::InsufficientFunds {
                balance,
                required,
                deficit,
            } => {
                assert_eq!(balance, Decimal::new(300, 0));
                assert_eq!(required, Decimal::new(500, 0));
                assert_eq!(deficit, Decimal::new(200, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tokio_test::block_on(store.entry_count()), 0);
    }

    #[test]
    fn test_conflicts_are_retried_then_surface() {
        let (store, ledger, id) = ledger_with(100);

        tokio_test::block_on(store.inject_version_conflicts(2));
        let applied = tokio_test::block_on(ledger.apply(
            id,
            &Mutation::credit(EntryKind::Deposit, Decimal::new(10, 0), TxnKey::deposit("D-1")),
            no_effects,
        ))
        .unwrap();
        assert_eq!(applied.attempts, 3);

        tokio_test::block_on(store.inject_version_conflicts(3));
        let err = tokio_test::block_on(ledger.apply(
            id,
            &Mutation::credit(EntryKind::Deposit, Decimal::new(10, 0), TxnKey::deposit("D-2")),
            no_effects,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::ConcurrentModification { attempts: 3 }
        ));
    }

    #[test]
    fn test_effects_can_reject_before_commit() {
        let (store, ledger, id) = ledger_with(100);
        let err = tokio_test::block_on(ledger.apply(
            id,
            &Mutation::debit(EntryKind::Withdrawal, Decimal::new(10, 0), TxnKey::withdrawal(id, "W-1")),
            |_, _| Err(SettlementError::Validation("blocked".into())),
        ))
        .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
        assert_eq!(tokio_test::block_on(store.entry_count()), 0);
    }
}
