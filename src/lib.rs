//! Casino Settlement Library
//!
//! Real-money settlement core: provider bet callbacks, deposits, withdrawals,
//! bonus wagering and affiliate commission over a versioned account store.

pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod models;
pub mod repositories;
pub mod services;
pub mod sweeper;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult, SettlementError, SettlementResult};

use config::StoreBackend;
use repositories::SettlementStore;
use services::SettlementOrchestrator;
use std::sync::Arc;

/// Shared state behind the HTTP router
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn SettlementStore>,
    pub orchestrator: Arc<SettlementOrchestrator>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SettlementStore>,
        orchestrator: Arc<SettlementOrchestrator>,
    ) -> Self {
        Self {
            config,
            store,
            orchestrator,
        }
    }

    pub fn store_label(&self) -> &'static str {
        match self.config.store {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}
