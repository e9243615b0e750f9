//! centre-sync CLI - Xero actuals for childcare centre budgets
//!
//! Usage:
//!   centre-sync init                          Initialize database
//!   centre-sync credentials add --tenant ID   Store a Xero credential
//!   centre-sync budget set ...                Set a monthly budget
//!   centre-sync sync --year 2025              Run one sync
//!   centre-sync schedule --interval-hours 6   Sync on an interval

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use centre_sync_core::ClientCredentials;
use chrono::Datelike;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let this_year = chrono::Utc::now().year();

    match cli.command {
        Commands::Init => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_init(&cli.db, &config, cli.no_encrypt)
        }
        Commands::Credentials { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                CredentialsAction::List => commands::cmd_credentials_list(&db),
                CredentialsAction::Add {
                    tenant,
                    name,
                    access_token,
                    refresh_token,
                    expires_in,
                } => commands::cmd_credentials_add(
                    &db,
                    &tenant,
                    name.as_deref(),
                    &access_token,
                    &refresh_token,
                    expires_in,
                ),
            }
        }
        Commands::Budget { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                BudgetAction::Set {
                    tenant,
                    category,
                    year,
                    month,
                    amount,
                } => {
                    let config = commands::load_config(cli.config.as_deref())?;
                    commands::cmd_budget_set(&db, &config, &tenant, &category, year, month, amount)
                }
                BudgetAction::List { tenant, year } => {
                    commands::cmd_budget_list(&db, tenant.as_deref(), year.unwrap_or(this_year))
                }
            }
        }
        Commands::Tenants => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_tenants(db, &config, ClientCredentials::from_env()).await
        }
        Commands::Sync { year, tenant, json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_sync(
                db,
                config,
                ClientCredentials::from_env(),
                year.unwrap_or(this_year),
                tenant.as_deref(),
                json,
            )
            .await
        }
        Commands::Schedule {
            interval_hours,
            run_now,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_schedule(
                db,
                config,
                ClientCredentials::from_env(),
                interval_hours,
                run_now,
            )
            .await
        }
        Commands::Actuals { tenant, year } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_actuals(&db, tenant.as_deref(), year.unwrap_or(this_year))
        }
    }
}
