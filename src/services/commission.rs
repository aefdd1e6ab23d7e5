use crate::error::{RepositoryError, SettlementError, SettlementResult};
use crate::models::money::percent_of;
use crate::models::{Affiliate, CommissionRecord, CommissionStatus, CommissionType};
use crate::repositories::{CommissionUpdate, SettlementStore};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A settled bet as the commission rules see it
#[derive(Debug, Clone)]
pub struct SettledBet {
    /// Key of the SETTLE event
    pub source_key: String,
    pub game_code: String,
    pub game_name: String,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    /// `win - bet`
    pub net_amount: Decimal,
    pub is_win: bool,
    pub crash_style: bool,
}

impl SettledBet {
    pub fn new(
        source_key: impl Into<String>,
        game_code: impl Into<String>,
        game_name: impl Into<String>,
        bet_amount: Decimal,
        win_amount: Decimal,
        crash_style: bool,
    ) -> Self {
        let net_amount = win_amount - bet_amount;
        Self {
            source_key: source_key.into(),
            game_code: game_code.into(),
            game_name: game_name.into(),
            bet_amount,
            win_amount,
            net_amount,
            is_win: net_amount > Decimal::ZERO,
            crash_style,
        }
    }
}

/// Which rule fires for one settled bet
#[derive(Debug, Clone, PartialEq)]
pub enum CommissionDecision {
    /// Loss while the deposit pool is open
    Loss { amount: Decimal, pool_after: Decimal },
    /// Win charged back to the affiliate's minus balance
    WinDeduction { amount: Decimal },
    Skip(&'static str),
}

/// Pure rule selection; at most one rule fires per bet.
pub fn decide(pool: Decimal, rate: Decimal, bet: &SettledBet) -> CommissionDecision {
    if bet.is_win {
        if pool > Decimal::ZERO && !bet.crash_style {
            return CommissionDecision::Skip("win while deposit pool is open");
        }
        let amount = percent_of(bet.net_amount, rate);
        if amount <= Decimal::ZERO {
            return CommissionDecision::Skip("zero commission");
        }
        return CommissionDecision::WinDeduction { amount };
    }

    // Stake came back in full: nothing was lost
    if bet.net_amount.is_zero() {
        return CommissionDecision::Skip("break-even settle");
    }
    if pool <= Decimal::ZERO {
        return CommissionDecision::Skip("deposit pool exhausted");
    }
    let amount = percent_of(bet.bet_amount, rate);
    if amount <= Decimal::ZERO {
        return CommissionDecision::Skip("zero commission");
    }
    CommissionDecision::Loss {
        amount,
        pool_after: (pool - bet.bet_amount).max(Decimal::ZERO),
    }
}

/// Commission booked for one bet, for the settlement receipt
#[derive(Debug, Clone, Serialize)]
pub struct CommissionSummary {
    pub affiliate_code: String,
    pub commission_type: String,
    pub amount: Decimal,
    pub pool_before: Decimal,
    pub pool_after: Decimal,
}

impl CommissionSummary {
    fn from_record(code: &str, record: &CommissionRecord) -> Self {
        Self {
            affiliate_code: code.to_string(),
            commission_type: record.commission_type.as_str().to_string(),
            amount: record.amount,
            pool_before: record.pool_before,
            pool_after: record.pool_after,
        }
    }
}

/// Books affiliate commission for settled bets.
///
/// Runs after the bet itself is committed and under its own version checks
/// on both the account (deposit pool) and the affiliate (earnings). Callers
/// treat any error as a secondary failure.
pub struct CommissionEngine {
    store: Arc<dyn SettlementStore>,
    max_attempts: u32,
}

impl CommissionEngine {
    pub fn new(store: Arc<dyn SettlementStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn settle_commission(
        &self,
        account_id: Uuid,
        bet: &SettledBet,
    ) -> SettlementResult<Option<CommissionSummary>> {
        for attempt in 1..=self.max_attempts {
            match self.try_settle(account_id, bet).await {
                Err(SettlementError::Repository(RepositoryError::VersionConflict(reason))) => {
                    debug!(
                        "Commission for {} hit a version conflict ({}), attempt {}/{}",
                        bet.source_key, reason, attempt, self.max_attempts
                    );
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }

        Err(SettlementError::ConcurrentModification {
            attempts: self.max_attempts,
        })
    }

    async fn try_settle(
        &self,
        account_id: Uuid,
        bet: &SettledBet,
    ) -> SettlementResult<Option<CommissionSummary>> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or_else(|| SettlementError::AccountNotFound(account_id.to_string()))?;

        let Some(code) = account.affiliate_code.clone() else {
            return Ok(None);
        };

        let Some(affiliate) = self.store.find_affiliate_by_code(&code).await? else {
            warn!("Account {} refers to unknown affiliate {}", account_id, code);
            return Ok(None);
        };
        if !affiliate.is_active() {
            debug!("Affiliate {} is not active, no commission", code);
            return Ok(None);
        }

        if let Some(existing) = self.store.find_commission(&bet.source_key).await? {
            debug!("Commission for {} already booked", bet.source_key);
            return Ok(Some(CommissionSummary::from_record(&code, &existing)));
        }

        let pool_before = account.affiliate_deposit_pool;
        let decision = decide(pool_before, affiliate.commission_rate, bet);

        let (record, updated, pool_after) = match decision {
            CommissionDecision::Skip(reason) => {
                debug!("No commission for {}: {}", bet.source_key, reason);
                return Ok(None);
            }
            CommissionDecision::Loss { amount, pool_after } => {
                let mut updated = affiliate.clone();
                updated.pending_earnings += amount;
                updated.total_earnings += amount;
                let record = self.record(
                    &affiliate,
                    account_id,
                    bet,
                    CommissionType::LossCommission,
                    amount,
                    bet.bet_amount,
                    pool_before,
                    pool_after,
                );
                (record, updated, pool_after)
            }
            CommissionDecision::WinDeduction { amount } => {
                let mut updated = affiliate.clone();
                updated.minus_balance += amount;
                let record = self.record(
                    &affiliate,
                    account_id,
                    bet,
                    CommissionType::WinDeduction,
                    amount,
                    bet.net_amount,
                    pool_before,
                    pool_before,
                );
                (record, updated, pool_before)
            }
        };

        let update = CommissionUpdate {
            account_id,
            expected_account_version: account.version,
            new_deposit_pool: pool_after,
            affiliate: updated,
            record,
        };

        match self.store.commit_commission(&update).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(_)) => {
                debug!("Commission for {} booked concurrently", bet.source_key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Affiliate {} {} {} on {} (pool {} -> {})",
            code,
            update.record.commission_type.as_str(),
            update.record.amount,
            bet.source_key,
            pool_before,
            pool_after
        );
        Ok(Some(CommissionSummary::from_record(&code, &update.record)))
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        affiliate: &Affiliate,
        account_id: Uuid,
        bet: &SettledBet,
        commission_type: CommissionType,
        amount: Decimal,
        source_amount: Decimal,
        pool_before: Decimal,
        pool_after: Decimal,
    ) -> CommissionRecord {
        let status = match commission_type {
            CommissionType::LossCommission => CommissionStatus::Pending,
            CommissionType::WinDeduction => CommissionStatus::Cancelled,
        };
        CommissionRecord {
            id: Uuid::new_v4(),
            affiliate_id: affiliate.id,
            account_id,
            source_key: bet.source_key.clone(),
            game_code: bet.game_code.clone(),
            game_name: bet.game_name.clone(),
            commission_type,
            amount,
            commission_rate: affiliate.commission_rate,
            source_amount,
            bet_amount: bet.bet_amount,
            win_amount: bet.win_amount,
            pool_before,
            pool_after,
            status,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten() -> Decimal {
        Decimal::new(10, 0)
    }

    fn settled(bet: i64, win: i64, crash: bool) -> SettledBet {
        SettledBet::new("S-1", "slot-7", "Lucky 7", Decimal::new(bet, 0), Decimal::new(win, 0), crash)
    }

    #[test]
    fn test_loss_consumes_pool() {
        let decision = decide(Decimal::new(50, 0), ten(), &settled(80, 0, false));
        assert_eq!(
            decision,
            CommissionDecision::Loss {
                amount: Decimal::new(8, 0),
                pool_after: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn test_win_on_empty_pool_is_deduction() {
        let decision = decide(Decimal::ZERO, ten(), &settled(100, 300, false));
        assert_eq!(
            decision,
            CommissionDecision::WinDeduction {
                amount: Decimal::new(20, 0)
            }
        );
    }

    #[test]
    fn test_win_with_open_pool_is_noop() {
        let decision = decide(Decimal::new(500, 0), ten(), &settled(100, 300, false));
        assert!(matches!(decision, CommissionDecision::Skip(_)));
    }

    #[test]
    fn test_crash_win_deducts_even_with_open_pool() {
        let decision = decide(Decimal::new(500, 0), ten(), &settled(100, 300, true));
        assert_eq!(
            decision,
            CommissionDecision::WinDeduction {
                amount: Decimal::new(20, 0)
            }
        );
    }

    #[test]
    fn test_break_even_is_not_a_loss() {
        assert_eq!(
            decide(Decimal::new(500, 0), ten(), &settled(100, 100, false)),
            CommissionDecision::Skip("break-even settle")
        );
        assert_eq!(
            decide(Decimal::new(500, 0), ten(), &settled(100, 100, true)),
            CommissionDecision::Skip("break-even settle")
        );
    }

    #[test]
    fn test_loss_on_empty_pool_and_zero_rate_skip() {
        assert!(matches!(
            decide(Decimal::ZERO, ten(), &settled(80, 0, false)),
            CommissionDecision::Skip(_)
        ));
        assert!(matches!(
            decide(Decimal::new(100, 0), Decimal::ZERO, &settled(80, 0, false)),
            CommissionDecision::Skip(_)
        ));
    }

    #[test]
    fn test_commission_keeps_four_places() {
        let bet = SettledBet::new("S-2", "g", "g", Decimal::new(12345, 2), Decimal::ZERO, false);
        match decide(Decimal::new(1000, 0), Decimal::new(75, 1), &bet) {
            // 123.45 * 7.5% = 9.25875 -> 9.2588
            CommissionDecision::Loss { amount, .. } => assert_eq!(amount, Decimal::new(92588, 4)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
