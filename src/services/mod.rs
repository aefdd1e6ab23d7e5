pub mod account_lookup;
pub mod audit;
pub mod balance_ledger;
pub mod bonus;
pub mod commission;
pub mod game_catalog;
pub mod idempotency;
pub mod orchestrator;
pub mod wagering;

pub use account_lookup::{embedded_account_id, AccountResolver, LookupStrategy, ResolvedDeposit};
pub use audit::{verify_chain, AuditLogEntry, AuditRecord, AuditTrailService};
pub use balance_ledger::{Applied, BalanceLedger, Mutation};
pub use bonus::{BonusLifecycle, SweepReport};
pub use commission::{decide, CommissionDecision, CommissionEngine, CommissionSummary, SettledBet};
pub use game_catalog::{
    GameCatalog, GameInfo, GameLookup, HttpGameCatalog, StaticGameCatalog, UNKNOWN_GAME,
};
pub use idempotency::{Admission, IdempotencyGuard, TxnKey};
pub use orchestrator::{LedgerReplay, SettlePairing, SettlementOrchestrator, SettlementReceipt};
pub use wagering::{default_wager_factor, GrantProgress, WageringStatus, WageringTracker};
