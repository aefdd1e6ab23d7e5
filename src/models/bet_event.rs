//! Game-provider callbacks and the canonical bet event they resolve to.

use super::money::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Leg of a bet reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetType {
    #[serde(rename = "BET")]
    Bet,
    #[serde(rename = "SETTLE")]
    Settle,
    #[serde(rename = "CANCELBET")]
    CancelBet,
}

impl BetType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_uppercase().as_str() {
            "BET" => Ok(BetType::Bet),
            "SETTLE" => Ok(BetType::Settle),
            "CANCELBET" => Ok(BetType::CancelBet),
            other => Err(format!("Unsupported bet_type: {}", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Bet => "BET",
            BetType::Settle => "SETTLE",
            BetType::CancelBet => "CANCELBET",
        }
    }
}

/// Canonical bet event; all business logic runs on this shape only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetEvent {
    /// Provider username with the platform suffix still attached
    pub username: String,
    pub provider_code: Option<String>,
    pub game_code: String,
    pub amount: Decimal,
    pub bet_type: BetType,
    pub transaction_id: String,
}

/// Current provider payload
#[derive(Debug, Clone, Deserialize)]
pub struct GameCallback {
    pub username: Option<String>,
    pub provider_code: Option<String>,
    pub amount: Option<Decimal>,
    pub game_code: Option<String>,
    pub bet_type: Option<String>,
    pub transaction_id: String,
}

/// Older provider payload still sent by some integrations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGameCallback {
    pub user_name: Option<String>,
    pub game_code: Option<String>,
    pub amount: Option<Decimal>,
    /// DEBIT, CREDIT or ROLLBACK
    pub transaction_type: Option<String>,
    pub txn_id: String,
}

/// Either inbound shape; resolved once at the boundary
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProviderCallback {
    Current(GameCallback),
    Legacy(LegacyGameCallback),
}

fn required(field: Option<String>, name: &str) -> Result<String, String> {
    match field.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("Missing required field: {}", name)),
    }
}

fn checked_amount(amount: Option<Decimal>, bet_type: BetType) -> Result<Decimal, String> {
    let amount = amount.ok_or_else(|| "Missing required field: amount".to_string())?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(format!("Amount must not be negative: {}", amount));
    }
    let amount = match bet_type {
        // Refunds are credited as whole units
        BetType::CancelBet => amount.trunc(),
        _ => round_money(amount),
    };
    if bet_type == BetType::Bet && amount.is_zero() {
        return Err("BET amount must be greater than zero".to_string());
    }
    Ok(amount)
}

impl ProviderCallback {
    /// Parse a raw JSON body into one of the known shapes
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value)
            .map_err(|_| "Unrecognised callback payload: expected transaction_id or txnId".to_string())
    }

    /// Convert to the canonical event, validating every field
    pub fn into_event(self) -> Result<BetEvent, String> {
        match self {
            ProviderCallback::Current(cb) => {
                let transaction_id = required(Some(cb.transaction_id), "transaction_id")?;
                let bet_type = BetType::from_str(&required(cb.bet_type, "bet_type")?)?;
                Ok(BetEvent {
                    username: required(cb.username, "username")?,
                    provider_code: cb.provider_code.filter(|p| !p.trim().is_empty()),
                    game_code: required(cb.game_code, "game_code")?,
                    amount: checked_amount(cb.amount, bet_type)?,
                    bet_type,
                    transaction_id,
                })
            }
            ProviderCallback::Legacy(cb) => {
                let transaction_id = required(Some(cb.txn_id), "txnId")?;
                let bet_type = match required(cb.transaction_type, "transactionType")?
                    .to_uppercase()
                    .as_str()
                {
                    "DEBIT" => BetType::Bet,
                    "CREDIT" => BetType::Settle,
                    "ROLLBACK" => BetType::CancelBet,
                    other => return Err(format!("Unsupported transactionType: {}", other)),
                };
                Ok(BetEvent {
                    username: required(cb.user_name, "userName")?,
                    provider_code: None,
                    game_code: required(cb.game_code, "gameCode")?,
                    amount: checked_amount(cb.amount, bet_type)?,
                    bet_type,
                    transaction_id,
                })
            }
        }
    }
}

impl BetEvent {
    /// Strip the fixed-length platform suffix the provider carries on usernames
    pub fn account_username(&self, suffix_len: usize) -> Result<String, String> {
        let chars: Vec<char> = self.username.chars().collect();
        if chars.len() <= suffix_len {
            return Err(format!(
                "Username '{}' is shorter than the {}-character suffix",
                self.username, suffix_len
            ));
        }
        Ok(chars[..chars.len() - suffix_len].iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_payload_converts() {
        let cb = ProviderCallback::from_json(json!({
            "username": "rahim01abc",
            "provider_code": "JILI",
            "amount": 120.456,
            "game_code": "aviator",
            "bet_type": "BET",
            "transaction_id": "TXN1"
        }))
        .unwrap();
        let event = cb.into_event().unwrap();
        assert_eq!(event.bet_type, BetType::Bet);
        assert_eq!(event.amount, Decimal::new(12046, 2));
        assert_eq!(event.provider_code.as_deref(), Some("JILI"));
        assert_eq!(event.account_username(3).unwrap(), "rahim01");
    }

    #[test]
    fn test_legacy_payload_converts() {
        let cb = ProviderCallback::from_json(json!({
            "userName": "karim99xyz",
            "gameCode": "slot-7",
            "amount": "50",
            "transactionType": "credit",
            "txnId": "L-77"
        }))
        .unwrap();
        assert!(matches!(cb, ProviderCallback::Legacy(_)));
        let event = cb.into_event().unwrap();
        assert_eq!(event.bet_type, BetType::Settle);
        assert_eq!(event.transaction_id, "L-77");
    }

    #[test]
    fn test_refund_amount_is_truncated_to_whole_units() {
        let cb = ProviderCallback::from_json(json!({
            "username": "u1abc", "amount": 75.9, "game_code": "g",
            "bet_type": "CANCELBET", "transaction_id": "R1"
        }))
        .unwrap();
        assert_eq!(cb.into_event().unwrap().amount, Decimal::new(75, 0));
    }

    #[test]
    fn test_validation_failures() {
        let missing_amount = ProviderCallback::from_json(json!({
            "username": "u1abc", "game_code": "g", "bet_type": "BET", "transaction_id": "T"
        }))
        .unwrap();
        assert!(missing_amount.into_event().unwrap_err().contains("amount"));

        let negative = ProviderCallback::from_json(json!({
            "username": "u1abc", "amount": -5, "game_code": "g",
            "bet_type": "SETTLE", "transaction_id": "T"
        }))
        .unwrap();
        assert!(negative.into_event().is_err());

        let bad_type = ProviderCallback::from_json(json!({
            "username": "u1abc", "amount": 5, "game_code": "g",
            "bet_type": "JACKPOT", "transaction_id": "T"
        }))
        .unwrap();
        assert!(bad_type.into_event().is_err());

        assert!(ProviderCallback::from_json(json!({"amount": 5})).is_err());
    }

    #[test]
    fn test_short_username_rejected() {
        let event = BetEvent {
            username: "ab".into(),
            provider_code: None,
            game_code: "g".into(),
            amount: Decimal::ONE,
            bet_type: BetType::Bet,
            transaction_id: "T".into(),
        };
        assert!(event.account_username(3).is_err());
    }
}
