//! Sync command and report output

use anyhow::{Context, Result};
use centre_sync_core::{
    summary, ClientCredentials, Database, RunOptions, SyncConfig, SyncOrchestrator, SyncReport,
    TenantStatus,
};

use super::{money, truncate};

/// Run one sync and return the report without printing it
pub async fn run_sync(
    db: Database,
    config: SyncConfig,
    client_credentials: Option<ClientCredentials>,
    year: i32,
    tenant: Option<&str>,
) -> Result<SyncReport> {
    let orchestrator = SyncOrchestrator::with_database(config, client_credentials, db)
        .context("Failed to set up sync")?;

    let mut options = RunOptions::for_year(year);
    if let Some(tenant) = tenant {
        options = options.tenant(tenant);
    }

    orchestrator.run(&options).await.context("Sync failed")
}

pub async fn cmd_sync(
    db: Database,
    config: SyncConfig,
    client_credentials: Option<ClientCredentials>,
    year: i32,
    tenant: Option<&str>,
    json: bool,
) -> Result<()> {
    if !json {
        println!("🔄 Syncing Xero actuals for {}...", year);
    }

    let report = run_sync(db, config, client_credentials, year, tenant).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let failed = report.failed();
    if failed > 0 {
        anyhow::bail!("{} of {} tenants failed to sync", failed, report.tenants.len());
    }
    Ok(())
}

/// Human-readable report: one block per tenant with category totals
pub fn print_report(report: &SyncReport) {
    if report.tenants.is_empty() {
        println!("No tenants to sync. Add one with: centre-sync credentials add ...");
        return;
    }

    for outcome in report.tenants.values() {
        let name = outcome.tenant_name.as_deref().unwrap_or(&outcome.tenant_id);
        match &outcome.status {
            TenantStatus::Succeeded => println!(
                "\n✅ {} ({} requests, {} failed cells)",
                name, outcome.requests_issued, outcome.cells_failed
            ),
            TenantStatus::Failed { failure } => {
                println!("\n❌ {}: {}", name, failure);
                continue;
            }
        }

        println!(
            "   {:<30} {:>14} {:>14} {:>14} {:>7}",
            "Category", "Budget", "Actual", "Variance", "Failed"
        );
        println!("   {}", "-".repeat(83));
        for row in summary(&outcome.comparison) {
            println!(
                "   {:<30} {:>14} {:>14} {:>14} {:>7}",
                truncate(&row.category, 30),
                money(row.budget),
                money(row.actual),
                money(row.variance),
                row.failed_months
            );
        }
    }

    let elapsed = report.finished_at - report.started_at;
    println!(
        "\n📊 {} succeeded, {} failed in {:.1}s",
        report.succeeded(),
        report.failed(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );
}
