//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// centre-sync - Pull Xero actuals into centre budgets
#[derive(Parser)]
#[command(name = "centre-sync")]
#[command(about = "Sync Xero Profit & Loss actuals against childcare centre budgets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "centre-sync.db", global = true)]
    pub db: PathBuf,

    /// Config file (defaults to the data-dir override, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set CENTRE_SYNC_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Manage stored Xero credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Manage monthly budgets
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },

    /// List the Xero organisations each stored credential can reach
    Tenants,

    /// Run one sync now
    Sync {
        /// Year to sync (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,

        /// Only sync this tenant id
        #[arg(short, long)]
        tenant: Option<String>,

        /// Print the full sync report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run syncs on an interval until interrupted
    Schedule {
        /// Hours between runs (defaults to CENTRE_SYNC_SCHEDULE_HOURS)
        #[arg(long)]
        interval_hours: Option<u64>,

        /// Run once immediately instead of waiting for the first interval
        #[arg(long)]
        run_now: bool,
    },

    /// Show stored actuals from previous syncs
    Actuals {
        /// Only show this tenant id
        #[arg(short, long)]
        tenant: Option<String>,

        /// Year to show (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,
    },
}

#[derive(Subcommand)]
pub enum CredentialsAction {
    /// List stored credentials (tokens are never printed)
    List,

    /// Store a credential from an initial OAuth authorization
    Add {
        /// Xero tenant id
        #[arg(long)]
        tenant: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Access token
        #[arg(long)]
        access_token: String,

        /// Refresh token
        #[arg(long)]
        refresh_token: String,

        /// Seconds until the access token expires
        #[arg(long, default_value = "1800")]
        expires_in: i64,
    },
}

#[derive(Subcommand)]
pub enum BudgetAction {
    /// Set the budget for one category and month
    Set {
        /// Xero tenant id
        #[arg(long)]
        tenant: String,

        /// Budget category (as named in the config)
        #[arg(long)]
        category: String,

        #[arg(long)]
        year: i32,

        /// Month number (1-12)
        #[arg(long)]
        month: u32,

        /// Budget amount
        #[arg(long)]
        amount: f64,
    },

    /// List budgets for a year
    List {
        /// Only show this tenant id
        #[arg(short, long)]
        tenant: Option<String>,

        /// Year to show (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,
    },
}
