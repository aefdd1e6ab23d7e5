use super::balance_ledger::BalanceLedger;
use crate::config::{BonusPolicy, PenaltyRule};
use crate::error::{SettlementError, SettlementResult};
use crate::models::money::{percent_of, round_money};
use crate::models::{Account, BonusGrant, BonusStatus, BonusType};
use crate::repositories::{AccountUpdate, SettlementStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Totals from one expiry sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub accounts: usize,
    pub grants_expired: usize,
    pub bonus_removed: Decimal,
    pub failures: usize,
}

/// Bonus grant activation, cancellation and expiry.
///
/// The `stage_*` functions only edit a pending `AccountUpdate`, so a grant
/// created by a deposit or cancelled by a withdrawal commits together with
/// that event's ledger entry.
pub struct BonusLifecycle {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<BalanceLedger>,
    policy: BonusPolicy,
}

impl BonusLifecycle {
    pub fn new(store: Arc<dyn SettlementStore>, ledger: Arc<BalanceLedger>, policy: BonusPolicy) -> Self {
        Self {
            store,
            ledger,
            policy,
        }
    }

    /// Bonus a credited deposit earns under the current policy, if any
    pub fn deposit_bonus(
        &self,
        account: &Account,
        requested: BonusType,
        deposit_amount: Decimal,
    ) -> Option<Decimal> {
        let percent = match requested {
            BonusType::FirstDeposit if !account.first_deposit_bonus_claimed => {
                self.policy.first_deposit_percent
            }
            BonusType::Reload => self.policy.reload_percent,
            _ => return None,
        };
        let amount = round_money(percent_of(deposit_amount, percent));
        (amount > Decimal::ZERO).then_some(amount)
    }

    /// Create an active grant and credit the bonus balance
    pub fn stage_grant(
        &self,
        update: &mut AccountUpdate,
        bonus_type: BonusType,
        amount: Decimal,
        multiplier: Option<Decimal>,
        code: Option<String>,
    ) -> SettlementResult<BonusGrant> {
        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "Bonus amount must be positive: {}",
                amount
            )));
        }
        let multiplier = multiplier.unwrap_or(self.policy.wagering_multiplier);
        if multiplier < Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "Wagering multiplier must not be negative: {}",
                multiplier
            )));
        }
        if bonus_type == BonusType::FirstDeposit {
            if update.account.first_deposit_bonus_claimed {
                return Err(SettlementError::Validation(
                    "First deposit bonus already claimed".to_string(),
                ));
            }
            update.account.first_deposit_bonus_claimed = true;
        }

        let grant = BonusGrant::new(
            update.account.id,
            bonus_type,
            amount,
            multiplier,
            code,
            self.policy.expiry_days,
        );
        update.account.bonus_balance += amount;
        update.new_grants.push(grant.clone());
        Ok(grant)
    }

    /// Cancel a grant, removing the penalty the rule prescribes from the
    /// bonus balance. Returns the amount actually removed.
    pub fn stage_cancel(
        update: &mut AccountUpdate,
        grant: &BonusGrant,
        rule: PenaltyRule,
        now: DateTime<Utc>,
    ) -> Decimal {
        let penalty = match rule {
            PenaltyRule::Forfeit => grant.amount,
            PenaltyRule::Unwagered => grant.unwagered_amount(),
            PenaltyRule::None => Decimal::ZERO,
        };
        let removed = Self::take_bonus(&mut update.account, penalty);
        let mut grant = grant.clone();
        grant.close(BonusStatus::Cancelled, now);
        grant.penalty_amount = Some(removed);
        update.grant_updates.push(grant);
        removed
    }

    /// Expire a grant and remove its unwagered share
    pub fn stage_expiry(update: &mut AccountUpdate, grant: &BonusGrant, now: DateTime<Utc>) -> Decimal {
        let removed = Self::take_bonus(&mut update.account, grant.unwagered_amount());
        let mut grant = grant.clone();
        grant.close(BonusStatus::Expired, now);
        grant.penalty_amount = Some(removed);
        update.grant_updates.push(grant);
        removed
    }

    fn take_bonus(account: &mut Account, amount: Decimal) -> Decimal {
        let removed = round_money(amount).min(account.bonus_balance).max(Decimal::ZERO);
        account.bonus_balance -= removed;
        removed
    }

    /// Operator grant outside of a deposit
    pub async fn grant(
        &self,
        account_id: Uuid,
        bonus_type: BonusType,
        amount: Decimal,
        multiplier: Option<Decimal>,
        code: Option<String>,
    ) -> SettlementResult<BonusGrant> {
        let applied = self
            .ledger
            .update(account_id, |update, _| {
                self.stage_grant(update, bonus_type, amount, multiplier, code.clone())
                    .map(|_| ())
            })
            .await?;

        let grant = applied
            .new_grants
            .into_iter()
            .next()
            .ok_or_else(|| SettlementError::Validation("No grant staged".to_string()))?;
        info!(
            "Granted {} bonus {} to account {} (wager x{})",
            grant.bonus_type.as_str(),
            grant.amount,
            account_id,
            grant.wagering_multiplier
        );
        Ok(grant)
    }

    pub async fn cancel(&self, grant_id: Uuid, rule: PenaltyRule) -> SettlementResult<BonusGrant> {
        let grant = self
            .store
            .find_grant(grant_id)
            .await?
            .ok_or_else(|| SettlementError::GrantNotFound(grant_id.to_string()))?;

        let applied = self
            .ledger
            .update(grant.account_id, |update, snapshot| {
                let current = snapshot
                    .active_grants
                    .iter()
                    .find(|g| g.id == grant_id)
                    .ok_or_else(|| {
                        SettlementError::Validation(format!("Bonus grant {} is not active", grant_id))
                    })?;
                Self::stage_cancel(update, current, rule, Utc::now());
                Ok(())
            })
            .await?;

        let cancelled = applied
            .grant_updates
            .into_iter()
            .find(|g| g.id == grant_id)
            .ok_or_else(|| SettlementError::GrantNotFound(grant_id.to_string()))?;
        info!(
            "Cancelled bonus {} ({} rule, removed {})",
            grant_id,
            rule.as_str(),
            cancelled.penalty_amount.unwrap_or_default()
        );
        Ok(cancelled)
    }

    /// Expire every active grant past its expiry, one unit of work per account
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SettlementResult<SweepReport> {
        let account_ids = self.store.accounts_with_expired_grants(now).await?;
        let mut report = SweepReport::default();

        for account_id in account_ids {
            let result = self
                .ledger
                .update(account_id, |update, snapshot| {
                    for grant in snapshot.active_grants.iter().filter(|g| g.is_expired_at(now)) {
                        Self::stage_expiry(update, grant, now);
                    }
                    Ok(())
                })
                .await;

            match result {
                Ok(applied) => {
                    let expired = applied
                        .grant_updates
                        .iter()
                        .filter(|g| g.status == BonusStatus::Expired)
                        .count();
                    let removed: Decimal = applied
                        .grant_updates
                        .iter()
                        .filter_map(|g| g.penalty_amount)
                        .sum();
                    report.accounts += 1;
                    report.grants_expired += expired;
                    report.bonus_removed += removed;
                }
                Err(e) => {
                    warn!("Bonus expiry failed for account {}: {}", account_id, e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> BonusLifecycle {
        let store: Arc<dyn SettlementStore> = Arc::new(crate::repositories::MemoryStore::new());
        let guard = Arc::new(crate::services::IdempotencyGuard::new(store.clone()));
        let ledger = Arc::new(BalanceLedger::new(store.clone(), guard, 3));
        BonusLifecycle::new(store, ledger, BonusPolicy::default())
    }

    #[test]
    fn test_first_deposit_bonus_only_once() {
        let bonuses = lifecycle();
        let mut update = AccountUpdate::new(Account::new("nadia22"));

        bonuses
            .stage_grant(&mut update, BonusType::FirstDeposit, Decimal::new(500, 0), None, None)
            .unwrap();
        assert!(update.account.first_deposit_bonus_claimed);
        assert_eq!(update.account.bonus_balance, Decimal::new(500, 0));

        let err = bonuses
            .stage_grant(&mut update, BonusType::FirstDeposit, Decimal::new(500, 0), None, None)
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
        assert_eq!(update.new_grants.len(), 1);
    }

    #[test]
    fn test_deposit_bonus_respects_policy() {
        let bonuses = lifecycle();
        let mut account = Account::new("nadia22");
        assert_eq!(
            bonuses.deposit_bonus(&account, BonusType::FirstDeposit, Decimal::new(1000, 0)),
            Some(Decimal::new(1000, 0))
        );
        // Reload disabled by default
        assert_eq!(
            bonuses.deposit_bonus(&account, BonusType::Reload, Decimal::new(1000, 0)),
            None
        );
        account.first_deposit_bonus_claimed = true;
        assert_eq!(
            bonuses.deposit_bonus(&account, BonusType::FirstDeposit, Decimal::new(1000, 0)),
            None
        );
    }

    #[test]
    fn test_cancel_penalty_rules() {
        let now = Utc::now();
        let mut account = Account::new("rafi88");
        account.bonus_balance = Decimal::new(100, 0);
        let mut grant = BonusGrant::new(account.id, BonusType::Manual, Decimal::new(100, 0), Decimal::new(4, 0), None, 30);
        grant.accrue(Decimal::new(200, 0), now);

        let mut update = AccountUpdate::new(account.clone());
        let removed = BonusLifecycle::stage_cancel(&mut update, &grant, PenaltyRule::Unwagered, now);
        assert_eq!(removed, Decimal::new(50, 0));
        assert_eq!(update.account.bonus_balance, Decimal::new(50, 0));
        assert_eq!(update.grant_updates[0].status, BonusStatus::Cancelled);
        assert_eq!(update.grant_updates[0].penalty_amount, Some(Decimal::new(50, 0)));

        let mut update = AccountUpdate::new(account);
        let removed = BonusLifecycle::stage_cancel(&mut update, &grant, PenaltyRule::None, now);
        assert_eq!(removed, Decimal::ZERO);
        assert_eq!(update.account.bonus_balance, Decimal::new(100, 0));
    }

    #[test]
    fn test_expiry_floors_bonus_balance_at_zero() {
        let now = Utc::now();
        let mut account = Account::new("rafi88");
        account.bonus_balance = Decimal::new(30, 0);
        let grant = BonusGrant::new(account.id, BonusType::Reload, Decimal::new(100, 0), Decimal::new(2, 0), None, 30);

        let mut update = AccountUpdate::new(account);
        let removed = BonusLifecycle::stage_expiry(&mut update, &grant, now);
        assert_eq!(removed, Decimal::new(30, 0));
        assert_eq!(update.account.bonus_balance, Decimal::ZERO);
        assert_eq!(update.grant_updates[0].status, BonusStatus::Expired);
    }
}
