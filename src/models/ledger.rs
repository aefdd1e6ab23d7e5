use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of monetary event recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Bet,
    Win,
    Deposit,
    Withdrawal,
    Refund,
}

impl EntryKind {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bet => "bet",
            Self::Win => "win",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Refund => "refund",
        }
    }

    /// Convert from database string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bet" => Some(Self::Bet),
            "win" => Some(Self::Win),
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Immutable record of one applied monetary event.
///
/// `external_key` is unique across the ledger and doubles as the idempotency
/// anchor. `amount` is signed: debits are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Insertion order, assigned by the store
    pub seq: i64,
    pub account_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub external_key: String,
    pub game_code: Option<String>,
    pub provider_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        account_id: Uuid,
        kind: EntryKind,
        signed_amount: Decimal,
        balance_before: Decimal,
        external_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            account_id,
            kind,
            amount: signed_amount,
            balance_before,
            balance_after: balance_before + signed_amount,
            external_key: external_key.into(),
            game_code: None,
            provider_code: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_game(mut self, game_code: Option<String>, provider_code: Option<String>) -> Self {
        self.game_code = game_code;
        self.provider_code = provider_code;
        self
    }

    /// Arithmetic invariant every persisted entry satisfies
    pub fn is_consistent(&self) -> bool {
        self.balance_after == self.balance_before + self.amount
    }
}

/// Recompute a balance by replaying entries in ledger order
pub fn replay_balance(opening: Decimal, entries: &[LedgerEntry]) -> Decimal {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.seq);
    ordered.iter().fold(opening, |balance, e| balance + e.amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_conversion() {
        for kind in [
            EntryKind::Bet,
            EntryKind::Win,
            EntryKind::Deposit,
            EntryKind::Withdrawal,
            EntryKind::Refund,
        ] {
            assert_eq!(EntryKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::from_str("chargeback"), None);
    }

    #[test]
    fn test_new_entry_balances() {
        let entry = LedgerEntry::new(
            Uuid::new_v4(),
            EntryKind::Bet,
            Decimal::new(-250, 0),
            Decimal::new(1000, 0),
            "TXN-1",
        );
        assert_eq!(entry.balance_after, Decimal::new(750, 0));
        assert!(entry.is_consistent());
    }
}
