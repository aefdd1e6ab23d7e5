use super::bonus::BonusType;
use super::money::round_money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment-gateway deposit webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct DepositCallback {
    pub success: Option<bool>,
    #[serde(rename = "userIdentifyAddress")]
    pub user_identify_address: Option<String>,
    pub amount: Option<Decimal>,
    pub trxid: Option<String>,
}

/// Validated deposit notification
#[derive(Debug, Clone, PartialEq)]
pub struct DepositEvent {
    pub success: bool,
    pub identify_address: String,
    pub amount: Decimal,
    pub trxid: String,
}

impl DepositCallback {
    pub fn into_event(self) -> Result<DepositEvent, String> {
        let success = self
            .success
            .ok_or_else(|| "Missing required field: success".to_string())?;
        let identify_address = self
            .user_identify_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| "Missing required field: userIdentifyAddress".to_string())?;
        let trxid = self
            .trxid
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "Missing required field: trxid".to_string())?;
        let amount = self
            .amount
            .ok_or_else(|| "Missing required field: amount".to_string())?;
        let amount = round_money(amount);
        if success && amount <= Decimal::ZERO {
            return Err(format!("Deposit amount must be positive: {}", amount));
        }

        Ok(DepositEvent {
            success,
            identify_address,
            amount,
            trxid,
        })
    }
}

/// Pending-deposit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingDepositStatus {
    Pending,
    Completed,
    Failed,
}

impl PendingDepositStatus {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(PendingDepositStatus::Pending),
            "completed" => Ok(PendingDepositStatus::Completed),
            "failed" => Ok(PendingDepositStatus::Failed),
            _ => Err(format!("Invalid pending deposit status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PendingDepositStatus::Pending => "pending",
            PendingDepositStatus::Completed => "completed",
            PendingDepositStatus::Failed => "failed",
        }
    }
}

/// Deposit intent recorded when the player opened the gateway page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeposit {
    pub id: Uuid,
    pub account_id: Uuid,
    pub trxid: Option<String>,
    pub identify_address: String,
    pub amount: Decimal,
    /// Bonus the player opted into, if any
    pub bonus_type: Option<BonusType>,
    pub status: PendingDepositStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingDeposit {
    pub fn new(account_id: Uuid, identify_address: impl Into<String>, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            trxid: None,
            identify_address: identify_address.into(),
            amount,
            bonus_type: None,
            status: PendingDepositStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_bonus(mut self, bonus_type: BonusType) -> Self {
        self.bonus_type = Some(bonus_type);
        self
    }
}

/// Player withdrawal request
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub request_id: String,
}

impl WithdrawalRequest {
    pub fn validate(&self) -> Result<Decimal, String> {
        if self.request_id.trim().is_empty() {
            return Err("Missing required field: request_id".to_string());
        }
        let amount = round_money(self.amount);
        if amount <= Decimal::ZERO {
            return Err(format!("Withdrawal amount must be positive: {}", self.amount));
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deposit_callback_parses_gateway_shape() {
        let cb: DepositCallback = serde_json::from_value(json!({
            "success": true,
            "userIdentifyAddress": "dep_1f0e",
            "amount": 1000,
            "trxid": "BK123"
        }))
        .unwrap();
        let event = cb.into_event().unwrap();
        assert!(event.success);
        assert_eq!(event.amount, Decimal::new(1000, 0));
        assert_eq!(event.trxid, "BK123");
    }

    #[test]
    fn test_deposit_callback_requires_trxid() {
        let cb: DepositCallback = serde_json::from_value(json!({
            "success": true, "userIdentifyAddress": "x", "amount": 10
        }))
        .unwrap();
        assert!(cb.into_event().unwrap_err().contains("trxid"));
    }

    #[test]
    fn test_withdrawal_request_validation() {
        let req = WithdrawalRequest {
            account_id: Uuid::new_v4(),
            amount: Decimal::ZERO,
            request_id: "W1".into(),
        };
        assert!(req.validate().is_err());
    }
}
