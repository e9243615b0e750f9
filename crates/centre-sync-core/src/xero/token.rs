//! OAuth refresh-token exchange
//!
//! Xero rotates the refresh token on every use: the old one is consumed the
//! moment the exchange succeeds. The new pair is therefore written through to
//! the credential store before the access token is handed out, and a failed
//! write is reported as an error rather than silently dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{snippet, XeroClient};
use crate::config::ClientCredentials;
use crate::error::AuthError;
use crate::models::{CredentialUpdate, TenantCredential};
use crate::store::CredentialStore;

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 1800;

/// Longest lifetime trusted from a token response
const MAX_EXPIRES_IN_SECS: i64 = 86_400;

/// Tokens returned by a successful exchange
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Refreshes tenant credentials, one exchange at a time per tenant
pub struct TokenRefresher {
    client: XeroClient,
    client_credentials: Option<ClientCredentials>,
    store: Arc<dyn CredentialStore>,
    margin: chrono::Duration,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new(
        client: XeroClient,
        client_credentials: Option<ClientCredentials>,
        store: Arc<dyn CredentialStore>,
        margin: std::time::Duration,
    ) -> Self {
        Self {
            client,
            client_credentials,
            store,
            margin: chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::seconds(60)),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a usable credential, refreshing only when needed
    ///
    /// Refreshes when the token is inside the safety margin or when `force`
    /// is set (the previous request came back 401).
    pub async fn ensure_fresh(
        &self,
        credential: &TenantCredential,
        force: bool,
    ) -> Result<TenantCredential, AuthError> {
        if !force && !credential.needs_refresh(Utc::now(), self.margin) {
            debug!(tenant_id = %credential.tenant_id, "Access token still valid, skipping refresh");
            return Ok(credential.clone());
        }
        self.refresh(credential).await
    }

    /// Exchange the credential's refresh token and persist the new pair
    pub async fn refresh(&self, credential: &TenantCredential) -> Result<TenantCredential, AuthError> {
        let lock = self.tenant_lock(&credential.tenant_id);
        let _guard = lock.lock().await;

        // Another task may have rotated the token while we waited for the lock
        let current = self.store.get(&credential.tenant_id)?;
        if current.refresh_token != credential.refresh_token {
            debug!(
                tenant_id = %credential.tenant_id,
                "Credential already refreshed by another task"
            );
            return Ok(current);
        }

        let tokens = self.exchange(&current.refresh_token).await?;
        let now = Utc::now();
        let update = CredentialUpdate {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: expiry_from(now, tokens.expires_in),
            updated_at: now,
            previous_refresh_token: current.refresh_token.clone(),
        };

        if let Err(e) = self.store.update(&current.tenant_id, &update) {
            warn!(
                tenant_id = %current.tenant_id,
                "Refreshed token could not be saved; tenant will need re-authorization: {}",
                e
            );
            return Err(AuthError::Store(e));
        }

        info!(tenant_id = %current.tenant_id, "Refreshed Xero access token");

        Ok(TenantCredential {
            access_token: update.access_token,
            refresh_token: update.refresh_token,
            expires_at: update.expires_at,
            updated_at: update.updated_at,
            ..current
        })
    }

    /// POST `grant_type=refresh_token` to the identity server
    pub async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let creds = self
            .client_credentials
            .as_ref()
            .ok_or(AuthError::MissingClientCredentials)?;

        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", creds.client_id, creds.client_secret));

        let response = self
            .client
            .http()
            .post(&self.client.endpoints().token_url)
            .header(AUTHORIZATION, format!("Basic {}", basic))
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        parse_token_response(&body)
    }
}

/// Validate a token response; both tokens must be present and non-empty
fn parse_token_response(body: &str) -> Result<TokenPair, AuthError> {
    let raw: RawTokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

    let access_token = raw
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingField("access_token"))?;
    let refresh_token = raw
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingField("refresh_token"))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        expires_in: raw
            .expires_in
            .as_ref()
            .and_then(lifetime_secs)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
    })
}

/// `expires_in` as whole seconds; accepts integers, floats and numeric strings
///
/// Anything unusable yields `None` so the rotated pair is still saved with
/// the default lifetime.
fn lifetime_secs(value: &serde_json::Value) -> Option<i64> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !secs.is_finite() || secs < 1.0 {
        return None;
    }
    Some(secs.min(MAX_EXPIRES_IN_SECS as f64) as i64)
}

fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let lifetime = chrono::TimeDelta::try_seconds(expires_in.clamp(0, MAX_EXPIRES_IN_SECS))
        .unwrap_or_else(|| chrono::TimeDelta::seconds(DEFAULT_EXPIRES_IN_SECS));
    now.checked_add_signed(lifetime).unwrap_or(now)
}
