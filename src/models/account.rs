use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One player. Balance fields are only ever changed through a versioned
/// unit of work; `version` is bumped on every committed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub player_id: Option<String>,
    pub phone: Option<String>,
    pub balance: Decimal,
    pub bonus_balance: Decimal,
    pub total_deposited: Decimal,
    pub total_wagered: Decimal,
    pub total_won: Decimal,
    pub total_lost: Decimal,
    /// Wagering counted against the most recent deposit
    pub wagered_since_deposit: Decimal,
    pub last_deposit_amount: Decimal,
    pub wagering_multiplier: Decimal,
    pub affiliate_code: Option<String>,
    /// How much of this player's deposits is still open to loss commission
    pub affiliate_deposit_pool: Decimal,
    pub first_deposit_bonus_claimed: bool,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, empty account
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            player_id: None,
            phone: None,
            balance: Decimal::ZERO,
            bonus_balance: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_wagered: Decimal::ZERO,
            total_won: Decimal::ZERO,
            total_lost: Decimal::ZERO,
            wagered_since_deposit: Decimal::ZERO,
            last_deposit_amount: Decimal::ZERO,
            wagering_multiplier: Decimal::ZERO,
            affiliate_code: None,
            affiliate_deposit_pool: Decimal::ZERO,
            first_deposit_bonus_claimed: false,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_affiliate(mut self, code: impl Into<String>, deposit_pool: Decimal) -> Self {
        self.affiliate_code = Some(code.into());
        self.affiliate_deposit_pool = deposit_pool;
        self
    }

    pub fn with_deposit_snapshot(mut self, amount: Decimal, multiplier: Decimal) -> Self {
        self.last_deposit_amount = amount;
        self.wagering_multiplier = multiplier;
        self
    }

    pub fn with_player_id(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn has_affiliate(&self) -> bool {
        self.affiliate_code.as_deref().map_or(false, |c| !c.is_empty())
    }
}
