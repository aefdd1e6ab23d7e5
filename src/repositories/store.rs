//! Storage seam for the settlement core.
//!
//! Every mutation is expressed as one unit of work that commits atomically:
//! an optimistic version check on the owning row, the row writes, and the
//! insert of the uniquely-keyed ledger (or commission) record. Implementations
//! must report a failed version check as `RepositoryError::VersionConflict` and
//! a key collision as `RepositoryError::Duplicate`.

use crate::error::RepositoryError;
use crate::models::{
    Account, Affiliate, BonusGrant, CommissionRecord, LedgerEntry, PendingDeposit,
    PendingDepositStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Account plus the bonus grants that are still active
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub account: Account,
    pub active_grants: Vec<BonusGrant>,
}

/// Everything one accepted event changes on an account
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    /// New account state; `version` still holds the value that was read
    pub account: Account,
    pub entry: Option<LedgerEntry>,
    /// Existing grants whose progress or status changed
    pub grant_updates: Vec<BonusGrant>,
    pub new_grants: Vec<BonusGrant>,
    pub pending_deposit: Option<(Uuid, PendingDepositStatus)>,
}

impl AccountUpdate {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            entry: None,
            grant_updates: Vec::new(),
            new_grants: Vec::new(),
            pending_deposit: None,
        }
    }

    pub fn expected_version(&self) -> i64 {
        self.account.version
    }
}

/// Commission booking: pool change on the account and earnings change on the
/// affiliate, both version-checked, plus the record itself
#[derive(Debug, Clone)]
pub struct CommissionUpdate {
    pub account_id: Uuid,
    pub expected_account_version: i64,
    pub new_deposit_pool: Decimal,
    /// New affiliate state; `version` still holds the value that was read
    pub affiliate: Affiliate,
    pub record: CommissionRecord,
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    async fn insert_account(&self, account: &Account) -> Result<(), RepositoryError>;

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError>;

    async fn find_account_by_username(&self, username: &str)
        -> Result<Option<Account>, RepositoryError>;

    async fn find_account_by_player_id(
        &self,
        player_id: &str,
    ) -> Result<Option<Account>, RepositoryError>;

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<Account>, RepositoryError>;

    /// Account with its active grants, read together
    async fn load_snapshot(&self, account_id: Uuid)
        -> Result<Option<AccountSnapshot>, RepositoryError>;

    /// Apply one unit of work atomically
    async fn commit_account_update(&self, update: &AccountUpdate) -> Result<(), RepositoryError>;

    // ---------------------------------------------------------------------
    // Ledger
    // ---------------------------------------------------------------------

    async fn find_entry(&self, external_key: &str) -> Result<Option<LedgerEntry>, RepositoryError>;

    /// Most recent BET entry for the account and game
    async fn find_latest_bet(
        &self,
        account_id: Uuid,
        game_code: &str,
    ) -> Result<Option<LedgerEntry>, RepositoryError>;

    /// All entries for the account in ledger order
    async fn entries_for_account(&self, account_id: Uuid)
        -> Result<Vec<LedgerEntry>, RepositoryError>;

    // ---------------------------------------------------------------------
    // Bonus grants
    // ---------------------------------------------------------------------

    async fn find_grant(&self, id: Uuid) -> Result<Option<BonusGrant>, RepositoryError>;

    async fn grants_for_account(&self, account_id: Uuid)
        -> Result<Vec<BonusGrant>, RepositoryError>;

    /// Accounts holding at least one active grant past its expiry
    async fn accounts_with_expired_grants(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    // ---------------------------------------------------------------------
    // Deposits
    // ---------------------------------------------------------------------

    async fn insert_pending_deposit(&self, deposit: &PendingDeposit)
        -> Result<(), RepositoryError>;

    /// Pending deposit matched by gateway trxid, or else the most recent
    /// pending one opened with this identify address
    async fn find_pending_deposit(
        &self,
        trxid: &str,
        identify_address: &str,
    ) -> Result<Option<PendingDeposit>, RepositoryError>;

    async fn set_pending_deposit_status(
        &self,
        id: Uuid,
        status: PendingDepositStatus,
    ) -> Result<(), RepositoryError>;

    // ---------------------------------------------------------------------
    // Affiliates
    // ---------------------------------------------------------------------

    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<(), RepositoryError>;

    async fn find_affiliate_by_code(&self, code: &str)
        -> Result<Option<Affiliate>, RepositoryError>;

    async fn find_commission(&self, source_key: &str)
        -> Result<Option<CommissionRecord>, RepositoryError>;

    async fn commissions_for_affiliate(
        &self,
        affiliate_id: Uuid,
    ) -> Result<Vec<CommissionRecord>, RepositoryError>;

    async fn commit_commission(&self, update: &CommissionUpdate) -> Result<(), RepositoryError>;
}
