use crate::error::{SettlementError, SettlementResult};
use crate::models::money::round_money;
use crate::models::{Account, BonusGrant};
use crate::repositories::AccountUpdate;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Factor used when a deposit carries no explicit multiplier.
/// Platform policy: a zero multiplier still means 110% of the deposit.
pub fn default_wager_factor() -> Decimal {
    Decimal::new(11, 1)
}

/// Progress of one active grant
#[derive(Debug, Clone, Serialize)]
pub struct GrantProgress {
    pub grant_id: Uuid,
    pub bonus_type: String,
    pub amount: Decimal,
    pub required: Decimal,
    pub wagered: Decimal,
    pub remaining: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Read model for the withdrawal screen
#[derive(Debug, Clone, Serialize)]
pub struct WageringStatus {
    pub account_id: Uuid,
    pub balance: Decimal,
    pub bonus_balance: Decimal,
    pub required: Decimal,
    pub wagered: Decimal,
    pub remaining: Decimal,
    pub withdrawable: bool,
    pub active_grants: Vec<GrantProgress>,
}

pub struct WageringTracker;

impl WageringTracker {
    /// Outstanding obligation against the most recent deposit
    pub fn required_wager(account: &Account) -> Decimal {
        if account.last_deposit_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let factor = if account.wagering_multiplier > Decimal::ZERO {
            account.wagering_multiplier
        } else {
            default_wager_factor()
        };
        round_money(account.last_deposit_amount * factor)
    }

    pub fn remaining(account: &Account) -> Decimal {
        (Self::required_wager(account) - account.wagered_since_deposit).max(Decimal::ZERO)
    }

    /// Count one bet towards the deposit requirement and towards every active
    /// grant. Returns the ids of grants this bet completed.
    pub fn apply_wager(
        update: &mut AccountUpdate,
        active_grants: &[BonusGrant],
        bet_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        update.account.total_wagered += bet_amount;
        update.account.wagered_since_deposit += bet_amount;

        let mut completed = Vec::new();
        for grant in active_grants {
            if !grant.is_accruing(now) {
                continue;
            }
            let mut grant = grant.clone();
            if grant.accrue(bet_amount, now) {
                completed.push(grant.id);
            }
            update.grant_updates.push(grant);
        }
        completed
    }

    pub fn check_withdrawal(account: &Account) -> SettlementResult<()> {
        let remaining = Self::remaining(account);
        if remaining > Decimal::ZERO {
            return Err(SettlementError::WageringIncomplete {
                required: Self::required_wager(account),
                wagered: account.wagered_since_deposit,
                remaining,
            });
        }
        Ok(())
    }

    pub fn status(account: &Account, active_grants: &[BonusGrant]) -> WageringStatus {
        let remaining = Self::remaining(account);
        WageringStatus {
            account_id: account.id,
            balance: account.balance,
            bonus_balance: account.bonus_balance,
            required: Self::required_wager(account),
            wagered: account.wagered_since_deposit,
            remaining,
            withdrawable: remaining.is_zero(),
            active_grants: active_grants
                .iter()
                .map(|g| GrantProgress {
                    grant_id: g.id,
                    bonus_type: g.bonus_type.as_str().to_string(),
                    amount: g.amount,
                    required: g.required_wager(),
                    wagered: g.amount_wagered,
                    remaining: g.remaining_wager(),
                    expires_at: g.expires_at,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BonusType;

    fn deposited(amount: i64, multiplier: Decimal) -> Account {
        Account::new("sumi07")
            .with_balance(Decimal::new(amount, 0))
            .with_deposit_snapshot(Decimal::new(amount, 0), multiplier)
    }

    #[test]
    fn test_zero_multiplier_uses_default_factor() {
        let account = deposited(1000, Decimal::ZERO);
        assert_eq!(WageringTracker::required_wager(&account), Decimal::new(1100, 0));
    }

    #[test]
    fn test_explicit_multiplier() {
        let account = deposited(500, Decimal::new(3, 0));
        assert_eq!(WageringTracker::required_wager(&account), Decimal::new(1500, 0));
    }

    #[test]
    fn test_no_deposit_means_no_requirement() {
        let account = Account::new("fresh01");
        assert_eq!(WageringTracker::required_wager(&account), Decimal::ZERO);
        assert!(WageringTracker::check_withdrawal(&account).is_ok());
    }

    #[test]
    fn test_withdrawal_unblocks_after_full_wager() {
        let mut account = deposited(1000, Decimal::ZERO);
        match WageringTracker::check_withdrawal(&account) {
            Err(SettlementError::WageringIncomplete { remaining, .. }) => {
                assert_eq!(remaining, Decimal::new(1100, 0))
            }
            other => panic!("expected WageringIncomplete, got {:?}", other),
        }

        account.wagered_since_deposit = Decimal::new(1100, 0);
        assert!(WageringTracker::check_withdrawal(&account).is_ok());
    }

    #[test]
    fn test_every_active_grant_accrues() {
        let account = deposited(1000, Decimal::ONE);
        let now = Utc::now();
        let small = BonusGrant::new(account.id, BonusType::Manual, Decimal::new(10, 0), Decimal::new(5, 0), None, 30);
        let large = BonusGrant::new(account.id, BonusType::Reload, Decimal::new(100, 0), Decimal::new(5, 0), None, 30);

        let mut update = AccountUpdate::new(account);
        let completed = WageringTracker::apply_wager(
            &mut update,
            &[small.clone(), large.clone()],
            Decimal::new(60, 0),
            now,
        );

        assert_eq!(completed, vec![small.id]);
        assert_eq!(update.grant_updates.len(), 2);
        assert_eq!(update.grant_updates[1].amount_wagered, Decimal::new(60, 0));
        assert_eq!(update.account.wagered_since_deposit, Decimal::new(60, 0));
        assert_eq!(update.account.total_wagered, Decimal::new(60, 0));
    }
}
