//! Interval sync loop
//!
//! Runs a sync for the current year every `interval_hours`:
//!
//! - `--interval-hours` on the command line, or
//! - `CENTRE_SYNC_SCHEDULE_HOURS` in the environment
//!
//! The loop stops on Ctrl-C. A failed run is logged and the loop carries on.

use std::time::Duration;

use anyhow::Result;
use centre_sync_core::{ClientCredentials, Database, RunOptions, SyncConfig, SyncOrchestrator};
use chrono::Datelike;
use tokio::time::interval;
use tracing::{error, info, warn};

pub const SCHEDULE_HOURS_ENV: &str = "CENTRE_SYNC_SCHEDULE_HOURS";

/// Longest accepted interval (one year)
pub const MAX_SCHEDULE_HOURS: u64 = 24 * 366;

/// Configuration for scheduled syncs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Interval between syncs in hours
    pub interval_hours: u64,
}

impl ScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (CENTRE_SYNC_SCHEDULE_HOURS not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var(SCHEDULE_HOURS_ENV)
            .ok()
            .and_then(|s| s.parse().ok())?;
        Self::from_hours(interval_hours)
    }

    /// Command-line value first, then the environment
    pub fn resolve(interval_hours: Option<u64>) -> Option<Self> {
        match interval_hours {
            Some(hours) => Self::from_hours(hours),
            None => Self::from_env(),
        }
    }

    fn from_hours(interval_hours: u64) -> Option<Self> {
        if interval_hours == 0 {
            warn!("Schedule interval is 0, scheduled syncs disabled");
            return None;
        }
        if interval_hours > MAX_SCHEDULE_HOURS {
            warn!(
                "Schedule interval of {} hours exceeds {}, scheduled syncs disabled",
                interval_hours, MAX_SCHEDULE_HOURS
            );
            return None;
        }
        Some(Self { interval_hours })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }
}

pub async fn cmd_schedule(
    db: Database,
    config: SyncConfig,
    client_credentials: Option<ClientCredentials>,
    interval_hours: Option<u64>,
    run_now: bool,
) -> Result<()> {
    let Some(schedule) = ScheduleConfig::resolve(interval_hours) else {
        anyhow::bail!(
            "No schedule configured. Pass --interval-hours or set {}",
            SCHEDULE_HOURS_ENV
        );
    };

    let orchestrator = SyncOrchestrator::with_database(config, client_credentials, db)?;

    info!(
        "Starting sync scheduler: every {} hours",
        schedule.interval_hours
    );
    println!(
        "⏰ Syncing every {} hours. Press Ctrl-C to stop.",
        schedule.interval_hours
    );

    let mut ticker = interval(schedule.period());

    // The first tick completes immediately
    if !run_now {
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => run_scheduled(&orchestrator).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Scheduler stopped");
                println!("👋 Scheduler stopped");
                return Ok(());
            }
        }
    }
}

async fn run_scheduled(orchestrator: &SyncOrchestrator) {
    let year = chrono::Utc::now().year();
    info!(year, "Running scheduled sync");

    match orchestrator.run(&RunOptions::for_year(year)).await {
        Ok(report) if report.failed() == 0 => {
            info!(
                tenants = report.tenants.len(),
                "Scheduled sync completed"
            );
        }
        Ok(report) => {
            for outcome in report.tenants.values() {
                if let centre_sync_core::TenantStatus::Failed { failure } = &outcome.status {
                    warn!(tenant_id = %outcome.tenant_id, "Tenant sync failed: {}", failure);
                }
            }
            warn!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Scheduled sync completed with failures"
            );
        }
        Err(e) => error!("Scheduled sync failed: {}", e),
    }
}
