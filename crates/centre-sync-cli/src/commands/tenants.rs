//! Tenant listing through the connections endpoint

use std::sync::Arc;

use anyhow::{Context, Result};
use centre_sync_core::xero::stored_tenants;
use centre_sync_core::{ClientCredentials, Database, SyncConfig, TokenRefresher, XeroClient};
use tracing::warn;

use super::truncate;

/// For each stored credential, list the organisations its token can reach
pub async fn cmd_tenants(
    db: Database,
    config: &SyncConfig,
    client_credentials: Option<ClientCredentials>,
) -> Result<()> {
    let credentials = stored_tenants(&db).context("Failed to list credentials")?;
    if credentials.is_empty() {
        println!("No credentials stored.");
        return Ok(());
    }

    let client = XeroClient::from_config(config).context("Failed to build Xero client")?;
    let refresher = TokenRefresher::new(
        client.clone(),
        client_credentials,
        Arc::new(db.clone()),
        config.sync.refresh_margin,
    );

    for credential in credentials {
        println!("🔑 {} ({})", credential.display_name(), credential.tenant_id);

        let fresh = match refresher.ensure_fresh(&credential, false).await {
            Ok(fresh) => fresh,
            Err(e) => {
                println!("   ❌ {}", e);
                continue;
            }
        };

        match client.list_tenants(&fresh.access_token).await {
            Ok(tenants) if tenants.is_empty() => println!("   (no connected organisations)"),
            Ok(tenants) => {
                for tenant in tenants {
                    let marker = if tenant.tenant_id == credential.tenant_id {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "   {} {:<38} {}",
                        marker,
                        tenant.tenant_id,
                        truncate(&tenant.tenant_name, 40)
                    );

                    if tenant.tenant_id == credential.tenant_id
                        && credential.tenant_name.as_deref() != Some(tenant.tenant_name.as_str())
                        && !tenant.tenant_name.is_empty()
                    {
                        if let Err(e) = db.set_tenant_name(&tenant.tenant_id, &tenant.tenant_name)
                        {
                            warn!("Failed to update tenant name: {}", e);
                        }
                    }
                }
            }
            Err(e) => println!("   ❌ {}", e),
        }
    }

    Ok(())
}
