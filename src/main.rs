//! Casino Settlement Service
//!
//! Main entry point for the settlement core. This service provides:
//! - HTTP callbacks for game providers and the deposit gateway
//! - Withdrawal and bonus administration endpoints
//! - A background sweeper that expires stale bonus grants

use casino_settlement::config::StoreBackend;
use casino_settlement::database::{create_pool, run_migrations};
use casino_settlement::error::{AppError, AppResult};
use casino_settlement::repositories::{MemoryStore, PgStore, SettlementStore};
use casino_settlement::services::{
    AuditTrailService, GameCatalog, HttpGameCatalog, SettlementOrchestrator, StaticGameCatalog,
};
use casino_settlement::sweeper::BonusSweeper;
use casino_settlement::{http, AppConfig, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("casino_settlement={},sqlx=warn", config.log_level).into()
            }),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Casino Settlement Service Starting             ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("HTTP port: {}", config.http_port);

    // =========================================================================
    // STORE SETUP
    // =========================================================================
    let store: Arc<dyn SettlementStore> = match config.store {
        StoreBackend::Postgres => {
            info!("Connecting to database...");
            let pool = create_pool(&config.database).await.map_err(|e| {
                error!("Failed to create database pool: {}", e);
                AppError::Database(e)
            })?;
            info!("Max connections: {}", config.database.max_connections);

            info!("Running database migrations...");
            run_migrations(&pool, None).await.map_err(|e| {
                error!("Database migration failed: {}", e);
                AppError::Database(e)
            })?;
            info!("✓ Database migrations completed");

            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // =========================================================================
    // CORE SERVICES INITIALIZATION
    // =========================================================================
    info!("Initializing core services...");

    let catalog: Arc<dyn GameCatalog> = match &config.settlement.game_catalog_url {
        Some(url) => {
            info!("Game catalog: {}", url);
            Arc::new(HttpGameCatalog::new(url.clone()))
        }
        None => {
            warn!("GAME_CATALOG_URL not set - settlements will use placeholder game names");
            Arc::new(StaticGameCatalog::new())
        }
    };

    let audit_trail = Arc::new(
        AuditTrailService::new(&config.settlement.audit_log_dir).map_err(|e| {
            error!("Failed to initialize audit trail: {}", e);
            AppError::Message(format!("Audit trail initialization failed: {}", e))
        })?,
    );
    info!("✓ Audit trail service initialized");

    let orchestrator = Arc::new(
        SettlementOrchestrator::new(store.clone(), catalog, &config.settlement)
            .with_audit(audit_trail),
    );
    info!("✓ Settlement orchestrator initialized");

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================
    let sweep_interval = config.settlement.sweep_interval();
    let sweeper = BonusSweeper::new(orchestrator.clone(), sweep_interval);
    let sweeper_handle = tokio::spawn(async move {
        sweeper.start().await;
    });
    info!("✓ Bonus sweeper started ({:?} interval)", sweep_interval);

    // =========================================================================
    // START SERVER
    // =========================================================================
    let http_port = config.http_port;
    let environment = config.environment.clone();
    let state = Arc::new(AppState::new(config, store, orchestrator));
    let app = http::router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port)
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid HTTP address: {}", e)))?;
    let listener = TcpListener::bind(addr).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Casino Settlement Service Ready!               ║");
    info!("╠══════════════════════════════════════════════════════════╣");
    info!("║  HTTP API:     {}                              ║", addr);
    info!("║  Environment:  {}                                ║", environment);
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = server_handle => {
            error!("HTTP server exited unexpectedly");
        }
        _ = sweeper_handle => {
            error!("Bonus sweeper exited unexpectedly");
        }
    }

    info!("Casino settlement service shutdown complete");
    Ok(())
}
