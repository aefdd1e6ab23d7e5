pub mod memory_store;
pub mod pg_store;
pub mod store;

// Re-export the store seam and both backends
pub use memory_store::MemoryStore;
pub use pg_store::PgStore;
pub use store::{AccountSnapshot, AccountUpdate, CommissionUpdate, SettlementStore};
