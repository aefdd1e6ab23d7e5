//! Use-case coordinator for every inbound monetary event.
//!
//! Per external key an event moves `UNSEEN -> ADMITTED -> APPLIED ->
//! [COMMISSIONED] -> DONE`, or ends in `DUPLICATE` or `REJECTED`. Everything
//! that can block (game metadata, SETTLE pairing) happens before the
//! balance unit of work; commission runs after it and never undoes it.

use super::account_lookup::AccountResolver;
use super::audit::AuditTrailService;
use super::balance_ledger::{Applied, BalanceLedger, Mutation};
use super::bonus::{BonusLifecycle, SweepReport};
use super::commission::{CommissionEngine, CommissionSummary, SettledBet};
use super::game_catalog::{GameCatalog, GameLookup};
use super::idempotency::{duplicate_of, Admission, IdempotencyGuard, TxnKey};
use super::wagering::{WageringStatus, WageringTracker};
use crate::config::{PenaltyRule, SettlementConfig};
use crate::error::{account_or_not_found, SettlementError, SettlementResult};
use crate::models::{
    replay_balance, BetEvent, BetType, BonusGrant, BonusStatus, BonusType, DepositCallback,
    EntryKind, PendingDepositStatus, ProviderCallback, WithdrawalRequest,
};
use crate::repositories::SettlementStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a SETTLE was matched to its BET
#[derive(Debug, Clone, Serialize)]
pub struct SettlePairing {
    /// False when no BET was visible and the amount counted as pure winnings
    pub paired: bool,
    pub game_name: String,
    pub crash_style: bool,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub net_amount: Decimal,
    pub is_win: bool,
}

/// Externally visible result of an applied event
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub transaction_id: String,
    pub account_id: Uuid,
    pub kind: EntryKind,
    /// Signed ledger amount
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance: Decimal,
    pub bonus_balance: Decimal,
    pub wagering_remaining: Decimal,
    pub completed_grants: Vec<Uuid>,
    pub granted_bonuses: Vec<Uuid>,
    pub cancelled_grants: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle: Option<SettlePairing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission: Option<CommissionSummary>,
    /// Set when commission booking failed; the settlement itself stands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_error: Option<String>,
    pub attempts: u32,
}

impl SettlementReceipt {
    fn from_applied(key: &TxnKey, applied: &Applied) -> SettlementResult<Self> {
        let entry = applied.entry.as_ref().ok_or_else(|| {
            SettlementError::Validation(format!("No ledger entry recorded for {}", key))
        })?;
        let ids_with = |status: BonusStatus| -> Vec<Uuid> {
            applied
                .grant_updates
                .iter()
                .filter(|g| g.status == status)
                .map(|g| g.id)
                .collect()
        };
        Ok(Self {
            transaction_id: key.external_id().to_string(),
            account_id: applied.account.id,
            kind: entry.kind,
            amount: entry.amount,
            balance_before: entry.balance_before,
            balance: entry.balance_after,
            bonus_balance: applied.account.bonus_balance,
            wagering_remaining: WageringTracker::remaining(&applied.account),
            completed_grants: ids_with(BonusStatus::Completed),
            granted_bonuses: applied.new_grants.iter().map(|g| g.id).collect(),
            cancelled_grants: ids_with(BonusStatus::Cancelled),
            settle: None,
            commission: None,
            commission_error: None,
            attempts: applied.attempts,
        })
    }
}

/// Balance recomputed from the ledger next to the live balance
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReplay {
    pub account_id: Uuid,
    pub entries: usize,
    pub opening_balance: Decimal,
    pub replayed_balance: Decimal,
    pub live_balance: Decimal,
    /// Replay matches, every entry balances and consecutive entries chain
    pub consistent: bool,
}

pub struct SettlementOrchestrator {
    store: Arc<dyn SettlementStore>,
    guard: Arc<IdempotencyGuard>,
    ledger: Arc<BalanceLedger>,
    bonuses: BonusLifecycle,
    commission: CommissionEngine,
    resolver: AccountResolver,
    games: GameLookup,
    audit: Option<Arc<AuditTrailService>>,
    withdrawal_penalty: PenaltyRule,
}

impl SettlementOrchestrator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        catalog: Arc<dyn GameCatalog>,
        config: &SettlementConfig,
    ) -> Self {
        let guard = Arc::new(IdempotencyGuard::new(store.clone()));
        let ledger = Arc::new(BalanceLedger::new(
            store.clone(),
            guard.clone(),
            config.cas_max_attempts,
        ));

        Self {
            bonuses: BonusLifecycle::new(store.clone(), ledger.clone(), config.bonus.clone()),
            commission: CommissionEngine::new(store.clone(), config.cas_max_attempts),
            resolver: AccountResolver::new(store.clone(), config.username_suffix_len),
            games: GameLookup::new(
                catalog,
                config.game_lookup_timeout(),
                config.crash_game_patterns.clone(),
            ),
            withdrawal_penalty: config.bonus.withdrawal_penalty,
            audit: None,
            store,
            guard,
            ledger,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrailService>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    // =========================================================================
    // Game provider callbacks
    // =========================================================================

    /// Raw provider body in either the current or the legacy shape
    pub async fn handle_game_callback(
        &self,
        payload: serde_json::Value,
    ) -> SettlementResult<SettlementReceipt> {
        let event = ProviderCallback::from_json(payload)
            .and_then(ProviderCallback::into_event)
            .map_err(|reason| {
                warn!("Rejected game callback: {}", reason);
                SettlementError::Validation(reason)
            })?;
        self.handle_bet_event(&event).await
    }

    pub async fn handle_bet_event(&self, event: &BetEvent) -> SettlementResult<SettlementReceipt> {
        let mut account_id = None;
        let result = self.process_bet_event(event, &mut account_id).await;
        self.observe(&event.transaction_id, account_id, event.bet_type.as_str(), result)
            .await
    }

    async fn process_bet_event(
        &self,
        event: &BetEvent,
        account_id: &mut Option<Uuid>,
    ) -> SettlementResult<SettlementReceipt> {
        let account = self.resolver.resolve_player(event).await?;
        *account_id = Some(account.id);

        let key = TxnKey::game(event.provider_code.as_deref(), &event.transaction_id);
        self.guard.ensure_unseen(&key, account.id).await?;

        let game = (Some(event.game_code.clone()), event.provider_code.clone());

        match event.bet_type {
            BetType::Bet => {
                if !account.is_active {
                    return Err(SettlementError::Validation(format!(
                        "Account {} is deactivated",
                        account.username
                    )));
                }
                let amount = event.amount;
                let now = Utc::now();
                let mutation =
                    Mutation::debit(EntryKind::Bet, amount, key.clone()).with_game(game.0, game.1);
                let applied = self
                    .ledger
                    .apply(account.id, &mutation, |update, snapshot| {
                        WageringTracker::apply_wager(update, &snapshot.active_grants, amount, now);
                        Ok(())
                    })
                    .await?;
                SettlementReceipt::from_applied(&key, &applied)
            }
            BetType::Settle => {
                let info = self.games.resolve(&event.game_code).await;
                let paired = self.store.find_latest_bet(account.id, &event.game_code).await?;
                let bet_amount = paired
                    .as_ref()
                    .map(|entry| entry.amount.abs())
                    .unwrap_or(Decimal::ZERO);
                if paired.is_none() {
                    warn!(
                        "No BET visible for SETTLE {} on {}; treating {} as pure winnings",
                        event.transaction_id, event.game_code, event.amount
                    );
                }
                let settled = SettledBet::new(
                    key.as_str(),
                    event.game_code.as_str(),
                    info.name.as_str(),
                    bet_amount,
                    event.amount,
                    info.crash_style,
                );

                let mutation =
                    Mutation::credit(EntryKind::Win, event.amount, key.clone()).with_game(game.0, game.1);
                let applied = self
                    .ledger
                    .apply(account.id, &mutation, |update, _| {
                        if settled.is_win {
                            update.account.total_won += settled.net_amount;
                        } else {
                            update.account.total_lost -= settled.net_amount;
                        }
                        Ok(())
                    })
                    .await?;

                let mut receipt = SettlementReceipt::from_applied(&key, &applied)?;
                receipt.settle = Some(SettlePairing {
                    paired: paired.is_some(),
                    game_name: info.name.clone(),
                    crash_style: info.crash_style,
                    bet_amount: settled.bet_amount,
                    win_amount: settled.win_amount,
                    net_amount: settled.net_amount,
                    is_win: settled.is_win,
                });

                match self.commission.settle_commission(account.id, &settled).await {
                    Ok(summary) => receipt.commission = summary,
                    Err(e) => {
                        error!("Commission for {} failed: {}", key, e);
                        if let Some(audit) = &self.audit {
                            audit.log_commission_failure(account.id, key.as_str(), &e).await;
                        }
                        receipt.commission_error = Some(e.to_string());
                    }
                }
                Ok(receipt)
            }
            BetType::CancelBet => {
                let mutation =
                    Mutation::credit(EntryKind::Refund, event.amount, key.clone())
                    .with_game(game.0, game.1);
                let applied = self
                    .ledger
                    .apply(account.id, &mutation, |_, _| Ok(()))
                    .await?;
                SettlementReceipt::from_applied(&key, &applied)
            }
        }
    }

    // =========================================================================
    // Payment gateway
    // =========================================================================

    pub async fn handle_deposit_callback(
        &self,
        callback: DepositCallback,
    ) -> SettlementResult<SettlementReceipt> {
        let event = callback.into_event().map_err(|reason| {
            warn!("Rejected deposit callback: {}", reason);
            SettlementError::Validation(reason)
        })?;
        let mut account_id = None;
        let result = self
            .process_deposit(
                &event.trxid,
                &event.identify_address,
                event.amount,
                event.success,
                &mut account_id,
            )
            .await;
        self.observe(&event.trxid, account_id, "DEPOSIT", result).await
    }

    async fn process_deposit(
        &self,
        trxid: &str,
        identify_address: &str,
        amount: Decimal,
        success: bool,
        account_id: &mut Option<Uuid>,
    ) -> SettlementResult<SettlementReceipt> {
        let key = TxnKey::deposit(trxid);
        if let Admission::Duplicate(entry) = self.guard.admit(&key).await? {
            // A retry may no longer resolve once its pending deposit is completed
            let owner = match self.resolver.resolve_deposit(identify_address, trxid).await {
                Ok(resolved) => resolved.account.id,
                Err(_) => entry.account_id,
            };
            *account_id = Some(owner);
            return Err(duplicate_of(&key, owner, &entry));
        }

        let resolved = self.resolver.resolve_deposit(identify_address, trxid).await?;
        *account_id = Some(resolved.account.id);

        if !success {
            if let Some(pending) = &resolved.pending {
                self.store
                    .set_pending_deposit_status(pending.id, PendingDepositStatus::Failed)
                    .await?;
            }
            return Err(SettlementError::Validation(format!(
                "Gateway reported deposit {} as failed",
                trxid
            )));
        }

        let pending_id = resolved.pending.as_ref().map(|p| p.id);
        let requested_bonus = resolved.pending.as_ref().and_then(|p| p.bonus_type);
        let mutation = Mutation::credit(EntryKind::Deposit, amount, key.clone());

        let applied = self
            .ledger
            .apply(resolved.account.id, &mutation, |update, _| {
                update.account.total_deposited += amount;
                update.account.last_deposit_amount = amount;
                update.account.wagered_since_deposit = Decimal::ZERO;
                if update.account.has_affiliate() {
                    update.account.affiliate_deposit_pool += amount;
                }
                if let Some(id) = pending_id {
                    update.pending_deposit = Some((id, PendingDepositStatus::Completed));
                }
                if let Some(bonus_type) = requested_bonus {
                    match self.bonuses.deposit_bonus(&update.account, bonus_type, amount) {
                        Some(bonus) => {
                            self.bonuses
                                .stage_grant(update, bonus_type, bonus, None, None)?;
                        }
                        None => debug!(
                            "Deposit {} requested a {} bonus that the policy does not grant",
                            trxid,
                            bonus_type.as_str()
                        ),
                    }
                }
                Ok(())
            })
            .await?;

        SettlementReceipt::from_applied(&key, &applied)
    }

    // =========================================================================
    // Withdrawals
    // =========================================================================

    pub async fn request_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> SettlementResult<SettlementReceipt> {
        let amount = request.validate().map_err(SettlementError::Validation)?;
        let key = TxnKey::withdrawal(request.account_id, request.request_id.trim());
        let result = self.process_withdrawal(request.account_id, &key, amount).await;
        self.observe(key.external_id(), Some(request.account_id), "WITHDRAWAL", result)
            .await
    }

    async fn process_withdrawal(
        &self,
        account_id: Uuid,
        key: &TxnKey,
        amount: Decimal,
    ) -> SettlementResult<SettlementReceipt> {
        self.guard.ensure_unseen(key, account_id).await?;

        let rule = self.withdrawal_penalty;
        let now = Utc::now();
        let mutation = Mutation::debit(EntryKind::Withdrawal, amount, key.clone());

        let applied = self
            .ledger
            .apply(account_id, &mutation, |update, snapshot| {
                if !update.account.is_active {
                    return Err(SettlementError::Validation(format!(
                        "Account {} is deactivated",
                        update.account.username
                    )));
                }
                WageringTracker::check_withdrawal(&update.account)?;
                // Unmet bonus wagering is forfeited, not a blocker
                for grant in snapshot
                    .active_grants
                    .iter()
                    .filter(|g| g.remaining_wager() > Decimal::ZERO)
                {
                    BonusLifecycle::stage_cancel(update, grant, rule, now);
                }
                Ok(())
            })
            .await?;

        let receipt = SettlementReceipt::from_applied(key, &applied)?;
        if !receipt.cancelled_grants.is_empty() {
            info!(
                "Withdrawal {} cancelled {} bonus grant(s) under the {} rule",
                key,
                receipt.cancelled_grants.len(),
                rule.as_str()
            );
        }
        Ok(receipt)
    }

    // =========================================================================
    // Bonus administration
    // =========================================================================

    pub async fn grant_bonus(
        &self,
        account_id: Uuid,
        bonus_type: BonusType,
        amount: Decimal,
        multiplier: Option<Decimal>,
        code: Option<String>,
    ) -> SettlementResult<BonusGrant> {
        self.bonuses
            .grant(account_id, bonus_type, amount, multiplier, code)
            .await
    }

    /// Cancel a grant; `rule` defaults to the withdrawal penalty policy
    pub async fn cancel_bonus(
        &self,
        grant_id: Uuid,
        rule: Option<PenaltyRule>,
    ) -> SettlementResult<BonusGrant> {
        let rule = rule.unwrap_or(self.withdrawal_penalty);
        let grant = self.bonuses.cancel(grant_id, rule).await?;
        if let Some(audit) = &self.audit {
            audit
                .log_bonus_cancelled(
                    grant.account_id,
                    grant.id,
                    serde_json::json!({
                        "rule": rule.as_str(),
                        "penalty": grant.penalty_amount,
                    }),
                )
                .await;
        }
        Ok(grant)
    }

    pub async fn sweep_expired_bonuses(&self, now: DateTime<Utc>) -> SettlementResult<SweepReport> {
        let report = self.bonuses.sweep_expired(now).await?;
        if report.grants_expired > 0 {
            info!(
                "Expired {} bonus grant(s) on {} account(s), removed {}",
                report.grants_expired, report.accounts, report.bonus_removed
            );
            if let Some(audit) = &self.audit {
                audit
                    .log_bonus_expired(serde_json::to_value(&report).unwrap_or_default())
                    .await;
            }
        }
        Ok(report)
    }

    // =========================================================================
    // Read models
    // =========================================================================

    pub async fn wagering_status(&self, account_id: Uuid) -> SettlementResult<WageringStatus> {
        let snapshot = account_or_not_found(
            self.store.load_snapshot(account_id).await?,
            &account_id.to_string(),
        )?;
        Ok(WageringTracker::status(&snapshot.account, &snapshot.active_grants))
    }

    pub async fn ledger_replay(&self, account_id: Uuid) -> SettlementResult<LedgerReplay> {
        let account = account_or_not_found(
            self.store.find_account(account_id).await?,
            &account_id.to_string(),
        )?;
        let mut entries = self.store.entries_for_account(account_id).await?;
        entries.sort_by_key(|e| e.seq);

        let opening_balance = entries
            .first()
            .map(|e| e.balance_before)
            .unwrap_or(account.balance);
        let replayed_balance = replay_balance(opening_balance, &entries);

        let chained = entries
            .windows(2)
            .all(|pair| pair[0].balance_after == pair[1].balance_before);
        let balanced = entries.iter().all(|e| e.is_consistent());

        Ok(LedgerReplay {
            account_id,
            entries: entries.len(),
            opening_balance,
            replayed_balance,
            live_balance: account.balance,
            consistent: chained && balanced && replayed_balance == account.balance,
        })
    }

    // =========================================================================
    // Outcome logging
    // =========================================================================

    async fn observe(
        &self,
        key: &str,
        account_id: Option<Uuid>,
        label: &str,
        result: SettlementResult<SettlementReceipt>,
    ) -> SettlementResult<SettlementReceipt> {
        match &result {
            Ok(receipt) => {
                info!(
                    "{} {} applied: account {} balance {} -> {}",
                    label, key, receipt.account_id, receipt.balance_before, receipt.balance
                );
                if let Some(audit) = &self.audit {
                    let details = serde_json::to_value(receipt).unwrap_or_default();
                    audit.log_settled(receipt.account_id, key, details).await;
                }
            }
            Err(SettlementError::DuplicateTransaction { balance_after, .. }) => {
                warn!("{} {} already recorded (balance {})", label, key, balance_after);
            }
            Err(e) => {
                warn!("{} {} rejected: {}", label, key, e);
                if let Some(audit) = &self.audit {
                    audit.log_rejected(account_id, key, e).await;
                }
            }
        }
        result
    }
}
