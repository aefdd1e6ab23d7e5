use crate::error::{SettlementError, SettlementResult};
use crate::models::{Account, BetEvent, PendingDeposit};
use crate::repositories::SettlementStore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One way of matching a deposit callback to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Account id embedded after the last `_` of the identify address
    EmbeddedId,
    /// Pending deposit opened by the player
    PendingDeposit,
    Username,
    PlayerId,
    Phone,
}

impl LookupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStrategy::EmbeddedId => "embedded_id",
            LookupStrategy::PendingDeposit => "pending_deposit",
            LookupStrategy::Username => "username",
            LookupStrategy::PlayerId => "player_id",
            LookupStrategy::Phone => "phone",
        }
    }

    /// Default fallback order
    pub fn chain() -> Vec<LookupStrategy> {
        vec![
            LookupStrategy::EmbeddedId,
            LookupStrategy::PendingDeposit,
            LookupStrategy::Username,
            LookupStrategy::PlayerId,
            LookupStrategy::Phone,
        ]
    }
}

/// Account matched for a deposit and the pending deposit that goes with it
#[derive(Debug, Clone)]
pub struct ResolvedDeposit {
    pub account: Account,
    pub pending: Option<PendingDeposit>,
    pub strategy: LookupStrategy,
}

/// Parse the account id out of an identify address such as `dep_<uuid>`
pub fn embedded_account_id(identify_address: &str) -> Option<Uuid> {
    let segment = identify_address
        .rsplit_once('_')
        .map(|(_, id)| id)
        .unwrap_or(identify_address);
    Uuid::parse_str(segment.trim()).ok()
}

/// Finds accounts for inbound events
pub struct AccountResolver {
    store: Arc<dyn SettlementStore>,
    strategies: Vec<LookupStrategy>,
    username_suffix_len: usize,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn SettlementStore>, username_suffix_len: usize) -> Self {
        Self {
            store,
            strategies: LookupStrategy::chain(),
            username_suffix_len,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<LookupStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Game callbacks carry the provider username, suffix included
    pub async fn resolve_player(&self, event: &BetEvent) -> SettlementResult<Account> {
        let username = event
            .account_username(self.username_suffix_len)
            .map_err(SettlementError::Validation)?;
        self.store
            .find_account_by_username(&username)
            .await?
            .ok_or(SettlementError::AccountNotFound(username))
    }

    /// Walk the strategy chain until one yields an account
    pub async fn resolve_deposit(
        &self,
        identify_address: &str,
        trxid: &str,
    ) -> SettlementResult<ResolvedDeposit> {
        let pending = self.store.find_pending_deposit(trxid, identify_address).await?;

        for strategy in &self.strategies {
            let account = match strategy {
                LookupStrategy::EmbeddedId => match embedded_account_id(identify_address) {
                    Some(id) => self.store.find_account(id).await?,
                    None => None,
                },
                LookupStrategy::PendingDeposit => match &pending {
                    Some(p) => self.store.find_account(p.account_id).await?,
                    None => None,
                },
                LookupStrategy::Username => {
                    self.store.find_account_by_username(identify_address).await?
                }
                LookupStrategy::PlayerId => {
                    self.store.find_account_by_player_id(identify_address).await?
                }
                LookupStrategy::Phone => self.store.find_account_by_phone(identify_address).await?,
            };

            if let Some(account) = account {
                debug!(
                    "Deposit {} matched account {} by {}",
                    trxid,
                    account.id,
                    strategy.as_str()
                );
                // A pending deposit only counts if it belongs to this account
                let pending = pending.clone().filter(|p| p.account_id == account.id);
                return Ok(ResolvedDeposit {
                    account,
                    pending,
                    strategy: *strategy,
                });
            }
        }

        warn!(
            "No account for deposit {} (identify address {})",
            trxid, identify_address
        );
        Err(SettlementError::AccountNotFound(identify_address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_id_takes_last_segment() {
        let id = Uuid::new_v4();
        assert_eq!(embedded_account_id(&format!("dep_web_{}", id)), Some(id));
        assert_eq!(embedded_account_id(&id.to_string()), Some(id));
        assert_eq!(embedded_account_id("dep_rahim01"), None);
        assert_eq!(embedded_account_id("01712345678"), None);
    }

    #[test]
    fn test_restricted_chain_skips_other_strategies() {
        tokio_test::block_on(async {
            let store = Arc::new(crate::repositories::MemoryStore::new());
            let account = Account::new("rahim01").with_player_id("P-9001");
            store.insert_account(&account).await.unwrap();

            let resolver = AccountResolver::new(store.clone(), 3)
                .with_strategies(vec![LookupStrategy::PlayerId]);
            let resolved = resolver.resolve_deposit("P-9001", "BK1").await.unwrap();
            assert_eq!(resolved.account.id, account.id);
            assert_eq!(resolved.strategy, LookupStrategy::PlayerId);

            // Username matching is off in this chain
            let err = resolver.resolve_deposit("rahim01", "BK2").await.unwrap_err();
            assert!(matches!(err, SettlementError::AccountNotFound(_)));
        });
    }

    #[test]
    fn test_chain_order() {
        assert_eq!(
            LookupStrategy::chain(),
            vec![
                LookupStrategy::EmbeddedId,
                LookupStrategy::PendingDeposit,
                LookupStrategy::Username,
                LookupStrategy::PlayerId,
                LookupStrategy::Phone,
            ]
        );
    }
}
