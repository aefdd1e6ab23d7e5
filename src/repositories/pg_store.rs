//! Postgres implementation of the settlement store.

use super::store::{AccountSnapshot, AccountUpdate, CommissionUpdate, SettlementStore};
use crate::error::RepositoryError;
use crate::models::{
    Account, Affiliate, AffiliateStatus, BonusGrant, BonusStatus, BonusType, CommissionRecord,
    CommissionStatus, CommissionType, EntryKind, LedgerEntry, PendingDeposit,
    PendingDepositStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = r#"
    id, username, player_id, phone, balance, bonus_balance, total_deposited,
    total_wagered, total_won, total_lost, wagered_since_deposit, last_deposit_amount,
    wagering_multiplier, affiliate_code, affiliate_deposit_pool,
    first_deposit_bonus_claimed, is_active, version, created_at, updated_at
"#;

const ENTRY_COLUMNS: &str = r#"
    id, seq, account_id, kind, amount, balance_before, balance_after, external_key,
    game_code, provider_code, created_at
"#;

const GRANT_COLUMNS: &str = r#"
    id, account_id, bonus_type, code, amount, wagering_multiplier, amount_wagered,
    status, penalty_amount, created_at, expires_at, closed_at
"#;

const AFFILIATE_COLUMNS: &str = r#"
    id, code, status, commission_rate, pending_earnings, total_earnings, minus_balance,
    version, created_at, updated_at
"#;

const COMMISSION_COLUMNS: &str = r#"
    id, affiliate_id, account_id, source_key, game_code, game_name, commission_type,
    amount, commission_rate, source_amount, bet_amount, win_amount, pool_before,
    pool_after, status, created_at
"#;

const DEPOSIT_COLUMNS: &str = r#"
    id, account_id, trxid, identify_address, amount, bonus_type, status, created_at
"#;

fn decode<T>(parsed: Result<T, String>) -> Result<T, RepositoryError> {
    parsed.map_err(RepositoryError::Decode)
}

fn account_from_row(row: &PgRow) -> Result<Account, RepositoryError> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        player_id: row.try_get("player_id")?,
        phone: row.try_get("phone")?,
        balance: row.try_get("balance")?,
        bonus_balance: row.try_get("bonus_balance")?,
        total_deposited: row.try_get("total_deposited")?,
        total_wagered: row.try_get("total_wagered")?,
        total_won: row.try_get("total_won")?,
        total_lost: row.try_get("total_lost")?,
        wagered_since_deposit: row.try_get("wagered_since_deposit")?,
        last_deposit_amount: row.try_get("last_deposit_amount")?,
        wagering_multiplier: row.try_get("wagering_multiplier")?,
        affiliate_code: row.try_get("affiliate_code")?,
        affiliate_deposit_pool: row.try_get("affiliate_deposit_pool")?,
        first_deposit_bonus_claimed: row.try_get("first_deposit_bonus_claimed")?,
        is_active: row.try_get("is_active")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        seq: row.try_get("seq")?,
        account_id: row.try_get("account_id")?,
        kind: EntryKind::from_str(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("ledger kind {}", kind)))?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        external_key: row.try_get("external_key")?,
        game_code: row.try_get("game_code")?,
        provider_code: row.try_get("provider_code")?,
        created_at: row.try_get("created_at")?,
    })
}

fn grant_from_row(row: &PgRow) -> Result<BonusGrant, RepositoryError> {
    let bonus_type: String = row.try_get("bonus_type")?;
    let status: String = row.try_get("status")?;
    Ok(BonusGrant {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        bonus_type: decode(BonusType::from_str(&bonus_type))?,
        code: row.try_get("code")?,
        amount: row.try_get("amount")?,
        wagering_multiplier: row.try_get("wagering_multiplier")?,
        amount_wagered: row.try_get("amount_wagered")?,
        status: decode(BonusStatus::from_str(&status))?,
        penalty_amount: row.try_get("penalty_amount")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn affiliate_from_row(row: &PgRow) -> Result<Affiliate, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(Affiliate {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        status: decode(AffiliateStatus::from_str(&status))?,
        commission_rate: row.try_get("commission_rate")?,
        pending_earnings: row.try_get("pending_earnings")?,
        total_earnings: row.try_get("total_earnings")?,
        minus_balance: row.try_get("minus_balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn commission_from_row(row: &PgRow) -> Result<CommissionRecord, RepositoryError> {
    let commission_type: String = row.try_get("commission_type")?;
    let status: String = row.try_get("status")?;
    Ok(CommissionRecord {
        id: row.try_get("id")?,
        affiliate_id: row.try_get("affiliate_id")?,
        account_id: row.try_get("account_id")?,
        source_key: row.try_get("source_key")?,
        game_code: row.try_get("game_code")?,
        game_name: row.try_get("game_name")?,
        commission_type: decode(CommissionType::from_str(&commission_type))?,
        amount: row.try_get("amount")?,
        commission_rate: row.try_get("commission_rate")?,
        source_amount: row.try_get("source_amount")?,
        bet_amount: row.try_get("bet_amount")?,
        win_amount: row.try_get("win_amount")?,
        pool_before: row.try_get("pool_before")?,
        pool_after: row.try_get("pool_after")?,
        status: decode(CommissionStatus::from_str(&status))?,
        created_at: row.try_get("created_at")?,
    })
}

fn deposit_from_row(row: &PgRow) -> Result<PendingDeposit, RepositoryError> {
    let bonus_type: Option<String> = row.try_get("bonus_type")?;
    let status: String = row.try_get("status")?;
    Ok(PendingDeposit {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        trxid: row.try_get("trxid")?,
        identify_address: row.try_get("identify_address")?,
        amount: row.try_get("amount")?,
        bonus_type: bonus_type
            .map(|b| decode(BonusType::from_str(&b)))
            .transpose()?,
        status: decode(PendingDepositStatus::from_str(&status))?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store backed by the Postgres schema in `migrations/`
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_account_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {} FROM accounts WHERE {} = $1 LIMIT 1", ACCOUNT_COLUMNS, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

#[async_trait]
impl SettlementStore for PgStore {
    async fn insert_account(&self, account: &Account) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
            (id, username, player_id, phone, balance, bonus_balance, total_deposited,
             total_wagered, total_won, total_lost, wagered_since_deposit, last_deposit_amount,
             wagering_multiplier, affiliate_code, affiliate_deposit_pool,
             first_deposit_bonus_claimed, is_active, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.player_id)
        .bind(&account.phone)
        .bind(account.balance)
        .bind(account.bonus_balance)
        .bind(account.total_deposited)
        .bind(account.total_wagered)
        .bind(account.total_won)
        .bind(account.total_lost)
        .bind(account.wagered_since_deposit)
        .bind(account.last_deposit_amount)
        .bind(account.wagering_multiplier)
        .bind(&account.affiliate_code)
        .bind(account.affiliate_deposit_pool)
        .bind(account.first_deposit_bonus_claimed)
        .bind(account.is_active)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        self.find_account_where("username", username).await
    }

    async fn find_account_by_player_id(
        &self,
        player_id: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        self.find_account_where("player_id", player_id).await
    }

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<Account>, RepositoryError> {
        self.find_account_where("phone", phone).await
    }

    async fn load_snapshot(
        &self,
        account_id: Uuid,
    ) -> Result<Option<AccountSnapshot>, RepositoryError> {
        // Single repeatable-read transaction so the grants match the account version
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let Some(row) = sqlx::query(&sql)
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let account = account_from_row(&row)?;

        let sql = format!(
            "SELECT {} FROM bonus_grants WHERE account_id = $1 AND status = 'active' ORDER BY created_at",
            GRANT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&mut *tx)
            .await?;
        let active_grants = rows
            .iter()
            .map(grant_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;

        Ok(Some(AccountSnapshot {
            account,
            active_grants,
        }))
    }

    async fn commit_account_update(&self, update: &AccountUpdate) -> Result<(), RepositoryError> {
        let account = &update.account;
        let mut tx = self.pool.begin().await?;

        // Compare-and-swap on the version read with the snapshot
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, bonus_balance = $4, total_deposited = $5, total_wagered = $6,
                total_won = $7, total_lost = $8, wagered_since_deposit = $9,
                last_deposit_amount = $10, wagering_multiplier = $11,
                affiliate_deposit_pool = $12, first_deposit_bonus_claimed = $13,
                is_active = $14, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(account.id)
        .bind(update.expected_version())
        .bind(account.balance)
        .bind(account.bonus_balance)
        .bind(account.total_deposited)
        .bind(account.total_wagered)
        .bind(account.total_won)
        .bind(account.total_lost)
        .bind(account.wagered_since_deposit)
        .bind(account.last_deposit_amount)
        .bind(account.wagering_multiplier)
        .bind(account.affiliate_deposit_pool)
        .bind(account.first_deposit_bonus_claimed)
        .bind(account.is_active)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict(format!(
                "account {} changed since version {}",
                account.id,
                update.expected_version()
            )));
        }

        if let Some(entry) = &update.entry {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                (id, account_id, kind, amount, balance_before, balance_after, external_key,
                 game_code, provider_code, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(entry.id)
            .bind(entry.account_id)
            .bind(entry.kind.as_str())
            .bind(entry.amount)
            .bind(entry.balance_before)
            .bind(entry.balance_after)
            .bind(&entry.external_key)
            .bind(&entry.game_code)
            .bind(&entry.provider_code)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for grant in &update.grant_updates {
            sqlx::query(
                r#"
                UPDATE bonus_grants
                SET amount_wagered = $2, status = $3, penalty_amount = $4, closed_at = $5
                WHERE id = $1
                "#,
            )
            .bind(grant.id)
            .bind(grant.amount_wagered)
            .bind(grant.status.as_str())
            .bind(grant.penalty_amount)
            .bind(grant.closed_at)
            .execute(&mut *tx)
            .await?;
        }

        for grant in &update.new_grants {
            sqlx::query(
                r#"
                INSERT INTO bonus_grants
                (id, account_id, bonus_type, code, amount, wagering_multiplier, amount_wagered,
                 status, penalty_amount, created_at, expires_at, closed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(grant.id)
            .bind(grant.account_id)
            .bind(grant.bonus_type.as_str())
            .bind(&grant.code)
            .bind(grant.amount)
            .bind(grant.wagering_multiplier)
            .bind(grant.amount_wagered)
            .bind(grant.status.as_str())
            .bind(grant.penalty_amount)
            .bind(grant.created_at)
            .bind(grant.expires_at)
            .bind(grant.closed_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some((id, status)) = update.pending_deposit {
            sqlx::query("UPDATE pending_deposits SET status = $2 WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn find_entry(&self, external_key: &str) -> Result<Option<LedgerEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE external_key = $1",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(external_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_latest_bet(
        &self,
        account_id: Uuid,
        game_code: &str,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {} FROM ledger_entries
            WHERE account_id = $1 AND game_code = $2 AND kind = 'bet'
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(game_code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entries_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE account_id = $1 ORDER BY seq",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn find_grant(&self, id: Uuid) -> Result<Option<BonusGrant>, RepositoryError> {
        let sql = format!("SELECT {} FROM bonus_grants WHERE id = $1", GRANT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(grant_from_row).transpose()
    }

    async fn grants_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<BonusGrant>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM bonus_grants WHERE account_id = $1 ORDER BY created_at",
            GRANT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(grant_from_row).collect()
    }

    async fn accounts_with_expired_grants(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT account_id FROM bonus_grants WHERE status = 'active' AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("account_id").map_err(RepositoryError::from))
            .collect()
    }

    async fn insert_pending_deposit(
        &self,
        deposit: &PendingDeposit,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO pending_deposits
            (id, account_id, trxid, identify_address, amount, bonus_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(deposit.id)
        .bind(deposit.account_id)
        .bind(&deposit.trxid)
        .bind(&deposit.identify_address)
        .bind(deposit.amount)
        .bind(deposit.bonus_type.map(|b| b.as_str()))
        .bind(deposit.status.as_str())
        .bind(deposit.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_pending_deposit(
        &self,
        trxid: &str,
        identify_address: &str,
    ) -> Result<Option<PendingDeposit>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM pending_deposits WHERE trxid = $1 AND status = 'pending' LIMIT 1",
            DEPOSIT_COLUMNS
        );
        if let Some(row) = sqlx::query(&sql)
            .bind(trxid)
            .fetch_optional(&self.pool)
            .await?
        {
            return deposit_from_row(&row).map(Some);
        }

        let sql = format!(
            r#"
            SELECT {} FROM pending_deposits
            WHERE identify_address = $1 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            DEPOSIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(identify_address)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn set_pending_deposit_status(
        &self,
        id: Uuid,
        status: PendingDepositStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE pending_deposits SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("pending deposit {}", id)));
        }
        Ok(())
    }

    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO affiliates
            (id, code, status, commission_rate, pending_earnings, total_earnings, minus_balance,
             version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(affiliate.id)
        .bind(&affiliate.code)
        .bind(affiliate.status.as_str())
        .bind(affiliate.commission_rate)
        .bind(affiliate.pending_earnings)
        .bind(affiliate.total_earnings)
        .bind(affiliate.minus_balance)
        .bind(affiliate.version)
        .bind(affiliate.created_at)
        .bind(affiliate.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_affiliate_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Affiliate>, RepositoryError> {
        let sql = format!("SELECT {} FROM affiliates WHERE code = $1", AFFILIATE_COLUMNS);
        let row = sqlx::query(&sql).bind(code).fetch_optional(&self.pool).await?;
        row.as_ref().map(affiliate_from_row).transpose()
    }

    async fn find_commission(
        &self,
        source_key: &str,
    ) -> Result<Option<CommissionRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM commission_records WHERE source_key = $1",
            COMMISSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(source_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(commission_from_row).transpose()
    }

    async fn commissions_for_affiliate(
        &self,
        affiliate_id: Uuid,
    ) -> Result<Vec<CommissionRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM commission_records WHERE affiliate_id = $1 ORDER BY created_at",
            COMMISSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(affiliate_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn commit_commission(&self, update: &CommissionUpdate) -> Result<(), RepositoryError> {
        let affiliate = &update.affiliate;
        let record = &update.record;
        let mut tx = self.pool.begin().await?;

        let account_result = sqlx::query(
            r#"
            UPDATE accounts
            SET affiliate_deposit_pool = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(update.account_id)
        .bind(update.expected_account_version)
        .bind(update.new_deposit_pool)
        .execute(&mut *tx)
        .await?;

        if account_result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict(format!(
                "account {} changed since version {}",
                update.account_id, update.expected_account_version
            )));
        }

        let affiliate_result = sqlx::query(
            r#"
            UPDATE affiliates
            SET pending_earnings = $3, total_earnings = $4, minus_balance = $5,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(affiliate.id)
        .bind(affiliate.version)
        .bind(affiliate.pending_earnings)
        .bind(affiliate.total_earnings)
        .bind(affiliate.minus_balance)
        .execute(&mut *tx)
        .await?;

        if affiliate_result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict(format!(
                "affiliate {} changed since version {}",
                affiliate.id, affiliate.version
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO commission_records
            (id, affiliate_id, account_id, source_key, game_code, game_name, commission_type,
             amount, commission_rate, source_amount, bet_amount, win_amount, pool_before,
             pool_after, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(record.affiliate_id)
        .bind(record.account_id)
        .bind(&record.source_key)
        .bind(&record.game_code)
        .bind(&record.game_name)
        .bind(record.commission_type.as_str())
        .bind(record.amount)
        .bind(record.commission_rate)
        .bind(record.source_amount)
        .bind(record.bet_amount)
        .bind(record.win_amount)
        .bind(record.pool_before)
        .bind(record.pool_after)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
