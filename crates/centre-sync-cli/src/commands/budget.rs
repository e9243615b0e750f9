//! Monthly budget commands

use anyhow::{Context, Result};
use centre_sync_core::{Database, SyncConfig};

use super::{money, truncate};

pub fn cmd_budget_set(
    db: &Database,
    config: &SyncConfig,
    tenant_id: &str,
    category: &str,
    year: i32,
    month: u32,
    amount: f64,
) -> Result<()> {
    let mapping = config.mapping_for(tenant_id);
    if mapping.code_for(category).is_none() {
        let known: Vec<&str> = mapping.categories().collect();
        anyhow::bail!(
            "Unknown category '{}'. Known categories: {}",
            category,
            known.join(", ")
        );
    }

    db.set_budget(tenant_id, category, year, month, amount)
        .context("Failed to set budget")?;

    println!(
        "✅ Budget for {} {}-{:02}: {}",
        category,
        year,
        month,
        money(amount)
    );
    Ok(())
}

pub fn cmd_budget_list(db: &Database, tenant_id: Option<&str>, year: i32) -> Result<()> {
    let entries = db
        .list_budgets(tenant_id, year)
        .context("Failed to list budgets")?;

    if entries.is_empty() {
        println!("No budgets set for {}.", year);
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:<8} {:>14}",
        "Tenant ID", "Category", "Month", "Budget"
    );
    println!("{}", "-".repeat(93));

    let mut total = 0.0;
    for entry in &entries {
        total += entry.amount;
        println!(
            "{:<38} {:<30} {:<8} {:>14}",
            truncate(&entry.tenant_id, 38),
            truncate(&entry.category, 30),
            format!("{}-{:02}", entry.year, entry.month),
            money(entry.amount)
        );
    }

    println!("{}", "-".repeat(93));
    println!("{:<78} {:>14}", "Total", money(total));
    Ok(())
}
