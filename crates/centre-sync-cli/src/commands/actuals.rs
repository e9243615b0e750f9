//! Stored actuals from previous syncs

use anyhow::{Context, Result};
use centre_sync_core::Database;

use super::{money, truncate};

pub fn cmd_actuals(db: &Database, tenant_id: Option<&str>, year: i32) -> Result<()> {
    let actuals = db
        .list_actuals(tenant_id, year)
        .context("Failed to list actuals")?;

    if actuals.is_empty() {
        println!("No actuals stored for {}. Run: centre-sync sync --year {}", year, year);
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:<11} {:>14}  {}",
        "Tenant ID", "Category", "Month", "Actual", "Note"
    );
    println!("{}", "-".repeat(110));

    for actual in &actuals {
        let note = actual
            .failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_default();
        println!(
            "{:<38} {:<30} {:<11} {:>14}  {}",
            truncate(&actual.tenant_id, 38),
            truncate(&actual.category, 30),
            actual.month_key,
            money(actual.amount),
            note
        );
    }

    let failed = actuals.iter().filter(|a| a.failure.is_some()).count();
    if failed > 0 {
        println!("\n⚠️  {} cells are placeholders for failed requests", failed);
    }
    Ok(())
}
