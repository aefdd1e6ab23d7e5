//! Domain models for the settlement core.

pub mod account;
pub mod affiliate;
pub mod bet_event;
pub mod bonus;
pub mod deposit;
pub mod ledger;
pub mod money;

// Re-export all models for convenient access
pub use account::Account;
pub use affiliate::{Affiliate, AffiliateStatus, CommissionRecord, CommissionStatus, CommissionType};
pub use bet_event::{BetEvent, BetType, GameCallback, LegacyGameCallback, ProviderCallback};
pub use bonus::{BonusGrant, BonusStatus, BonusType};
pub use deposit::{
    DepositCallback, DepositEvent, PendingDeposit, PendingDepositStatus, WithdrawalRequest,
};
pub use ledger::{replay_balance, EntryKind, LedgerEntry};
