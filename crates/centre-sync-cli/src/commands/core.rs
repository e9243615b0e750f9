//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Shared utility to resolve the sync config
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use centre_sync_core::config::{default_config_path, CLIENT_ID_ENV, CLIENT_SECRET_ENV};
use centre_sync_core::{ClientCredentials, Database, SyncConfig};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load config from --config, the data-dir override, or the built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::load(path).context("Failed to load sync config")
}

pub fn cmd_init(db_path: &Path, config: &SyncConfig, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("   Tracking {} budget categories", config.categories.len());
    if let Some(path) = default_config_path() {
        let state = if path.exists() { "in use" } else { "not present" };
        println!("   Config override: {} ({})", path.display(), state);
    }

    if ClientCredentials::from_env().is_none() {
        println!(
            "   💡 Tip: Set {} and {} before syncing",
            CLIENT_ID_ENV, CLIENT_SECRET_ENV
        );
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Store a credential: centre-sync credentials add --tenant <id> ...");
    println!("  2. Set budgets: centre-sync budget set --tenant <id> --category \"Food Costs\" ...");
    println!("  3. Sync: centre-sync sync");

    Ok(())
}
