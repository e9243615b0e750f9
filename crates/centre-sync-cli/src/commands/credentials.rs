//! Stored Xero credential commands

use anyhow::{Context, Result};
use centre_sync_core::xero::stored_tenants;
use centre_sync_core::{CredentialStore, Database, TenantCredential};
use chrono::{Duration, Utc};

use super::truncate;

pub fn cmd_credentials_list(db: &Database) -> Result<()> {
    let credentials = stored_tenants(db).context("Failed to list credentials")?;

    if credentials.is_empty() {
        println!("No credentials stored. Add one with: centre-sync credentials add --tenant <id> ...");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<38} {:<30} {:<22} {:<10}",
        "Tenant ID", "Name", "Expires", "State"
    );
    println!("{}", "-".repeat(102));

    for credential in credentials {
        let state = if credential.expires_at <= now {
            "expired"
        } else {
            "valid"
        };
        println!(
            "{:<38} {:<30} {:<22} {:<10}",
            truncate(&credential.tenant_id, 38),
            truncate(credential.tenant_name.as_deref().unwrap_or("-"), 30),
            credential.expires_at.format("%Y-%m-%d %H:%M UTC"),
            state
        );
    }

    Ok(())
}

pub fn cmd_credentials_add(
    db: &Database,
    tenant_id: &str,
    name: Option<&str>,
    access_token: &str,
    refresh_token: &str,
    expires_in: i64,
) -> Result<()> {
    if tenant_id.trim().is_empty() {
        anyhow::bail!("Tenant id cannot be empty");
    }
    if refresh_token.is_empty() {
        anyhow::bail!("Refresh token cannot be empty");
    }

    let now = Utc::now();
    let credential = TenantCredential {
        tenant_id: tenant_id.trim().to_string(),
        tenant_name: name.map(str::to_string),
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_at: now + Duration::seconds(expires_in),
        updated_at: now,
    };

    db.upsert(&credential)
        .context("Failed to store credential")?;

    println!(
        "✅ Stored credential for {} (access token expires {})",
        credential.display_name(),
        credential.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}
