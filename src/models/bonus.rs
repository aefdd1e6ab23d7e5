use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of bonus grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    FirstDeposit,
    Reload,
    Cashback,
    Manual,
}

impl BonusType {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "first_deposit" => Ok(BonusType::FirstDeposit),
            "reload" => Ok(BonusType::Reload),
            "cashback" => Ok(BonusType::Cashback),
            "manual" => Ok(BonusType::Manual),
            _ => Err(format!("Invalid bonus type: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusType::FirstDeposit => "first_deposit",
            BonusType::Reload => "reload",
            BonusType::Cashback => "cashback",
            BonusType::Manual => "manual",
        }
    }
}

/// Bonus grant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusStatus {
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl BonusStatus {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "active" => Ok(BonusStatus::Active),
            "completed" => Ok(BonusStatus::Completed),
            "expired" => Ok(BonusStatus::Expired),
            "cancelled" => Ok(BonusStatus::Cancelled),
            _ => Err(format!("Invalid bonus status: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusStatus::Active => "active",
            BonusStatus::Completed => "completed",
            BonusStatus::Expired => "expired",
            BonusStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BonusStatus::Active)
    }
}

/// A bonus credited to one account, with its own wagering target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusGrant {
    pub id: Uuid,
    pub account_id: Uuid,
    pub bonus_type: BonusType,
    pub code: Option<String>,
    pub amount: Decimal,
    pub wagering_multiplier: Decimal,
    pub amount_wagered: Decimal,
    pub status: BonusStatus,
    pub penalty_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl BonusGrant {
    pub fn new(
        account_id: Uuid,
        bonus_type: BonusType,
        amount: Decimal,
        wagering_multiplier: Decimal,
        code: Option<String>,
        expiry_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            bonus_type,
            code,
            amount,
            wagering_multiplier,
            amount_wagered: Decimal::ZERO,
            status: BonusStatus::Active,
            penalty_amount: None,
            created_at: now,
            expires_at: now + Duration::days(expiry_days),
            closed_at: None,
        }
    }

    /// Total wagering needed to complete this grant
    pub fn required_wager(&self) -> Decimal {
        self.amount * self.wagering_multiplier
    }

    pub fn remaining_wager(&self) -> Decimal {
        (self.required_wager() - self.amount_wagered).max(Decimal::ZERO)
    }

    /// Active and not yet past its expiry
    pub fn is_accruing(&self, now: DateTime<Utc>) -> bool {
        self.status == BonusStatus::Active && now < self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BonusStatus::Active && now >= self.expires_at
    }

    /// Add one bet's contribution. Returns true if this increment completed
    /// the grant. Grants that are not accruing are left untouched, so the
    /// overshoot past the target is bounded by a single increment.
    pub fn accrue(&mut self, bet_amount: Decimal, now: DateTime<Utc>) -> bool {
        if !self.is_accruing(now) {
            return false;
        }
        self.amount_wagered += bet_amount;
        if self.amount_wagered >= self.required_wager() {
            self.status = BonusStatus::Completed;
            self.closed_at = Some(now);
            return true;
        }
        false
    }

    /// Share of the granted amount not yet covered by wagering
    pub fn unwagered_amount(&self) -> Decimal {
        let required = self.required_wager();
        if required <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let share = self.amount * self.remaining_wager() / required;
        share.max(Decimal::ZERO).min(self.amount)
    }

    /// Move to a terminal status
    pub fn close(&mut self, status: BonusStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}
