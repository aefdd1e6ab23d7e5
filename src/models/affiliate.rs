use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Affiliate account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateStatus {
    Active,
    Suspended,
}

impl AffiliateStatus {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AffiliateStatus::Active),
            "suspended" => Ok(AffiliateStatus::Suspended),
            _ => Err(format!("Invalid affiliate status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliateStatus::Active => "active",
            AffiliateStatus::Suspended => "suspended",
        }
    }
}

/// Referring affiliate and its running earnings counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affiliate {
    pub id: Uuid,
    pub code: String,
    pub status: AffiliateStatus,
    /// Percent, e.g. 10 for 10%
    pub commission_rate: Decimal,
    pub pending_earnings: Decimal,
    pub total_earnings: Decimal,
    /// Win deductions owed back to the house
    pub minus_balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Affiliate {
    pub fn new(code: impl Into<String>, commission_rate: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            status: AffiliateStatus::Active,
            commission_rate,
            pending_earnings: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            minus_balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AffiliateStatus::Active
    }
}

/// Which commission rule produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    LossCommission,
    WinDeduction,
}

impl CommissionType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "loss_commission" => Ok(CommissionType::LossCommission),
            "win_deduction" => Ok(CommissionType::WinDeduction),
            _ => Err(format!("Invalid commission type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::LossCommission => "loss_commission",
            CommissionType::WinDeduction => "win_deduction",
        }
    }
}

/// Payout state of a commission record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Cancelled,
    Paid,
}

impl CommissionStatus {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            "paid" => Ok(CommissionStatus::Paid),
            _ => Err(format!("Invalid commission status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Cancelled => "cancelled",
            CommissionStatus::Paid => "paid",
        }
    }
}

/// One commission booking with full provenance of the settled bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub account_id: Uuid,
    /// External key of the SETTLE event that triggered it
    pub source_key: String,
    pub game_code: String,
    pub game_name: String,
    pub commission_type: CommissionType,
    pub amount: Decimal,
    pub commission_rate: Decimal,
    /// Amount the rate was applied to (bet for losses, net win for deductions)
    pub source_amount: Decimal,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub pool_before: Decimal,
    pub pool_after: Decimal,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}
