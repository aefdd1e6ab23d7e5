use crate::services::{SettlementOrchestrator, SweepReport};
use crate::error::SettlementResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

/// Background task that expires bonus grants past their deadline
pub struct BonusSweeper {
    orchestrator: Arc<SettlementOrchestrator>,
    sweep_interval: Duration,
}

impl BonusSweeper {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, sweep_interval: Duration) -> Self {
        Self {
            orchestrator,
            sweep_interval,
        }
    }

    /// Start the sweeper loop; runs until the task is dropped
    pub async fn start(self) {
        let mut interval = time::interval(self.sweep_interval);
        info!("Bonus sweeper started, will sweep every {:?}", self.sweep_interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error sweeping expired bonuses: {}", e);
            }
        }
    }

    /// One pass over every account with an expired grant
    pub async fn sweep_once(&self) -> SettlementResult<SweepReport> {
        let report = self
            .orchestrator
            .sweep_expired_bonuses(chrono::Utc::now())
            .await?;

        if report.failures > 0 {
            error!(
                "Bonus sweep left {} account(s) for the next pass",
                report.failures
            );
        } else if report.grants_expired == 0 {
            debug!("Bonus sweep found nothing to expire");
        }

        Ok(report)
    }
}
