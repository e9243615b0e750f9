//! Tenant enumeration via the connections endpoint

use reqwest::header::ACCEPT;
use tracing::debug;

use super::{snippet, XeroClient};
use crate::error::{FetchError, StoreError};
use crate::models::{Tenant, TenantCredential};
use crate::store::CredentialStore;

impl XeroClient {
    /// Tenants the access token can reach
    ///
    /// The set changes as centres connect and disconnect, so callers must not
    /// assume a fixed count. A 401 comes back as `FetchError::Unauthorized`.
    pub async fn list_tenants(&self, access_token: &str) -> Result<Vec<Tenant>, FetchError> {
        let url = self.endpoints().connections_url.clone();
        let body = self
            .send_with_retry(
                || {
                    self.http()
                        .get(&url)
                        .bearer_auth(access_token)
                        .header(ACCEPT, "application/json")
                },
                None,
            )
            .await?;

        let tenants: Vec<Tenant> = serde_json::from_str(&body).map_err(|e| {
            FetchError::Malformed(format!("connections: {} ({})", e, snippet(&body)))
        })?;

        debug!(count = tenants.len(), "Listed Xero connections");
        Ok(tenants)
    }
}

/// All tenants with stored credentials, ordered by tenant id
pub fn stored_tenants(store: &dyn CredentialStore) -> Result<Vec<TenantCredential>, StoreError> {
    let mut tenants = store.list_all()?;
    tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
    Ok(tenants)
}
