//! Sync configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path, or the override in the data dir
//!    (~/.local/share/centre-sync/config/sync.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Xero client credentials come from the environment (`XERO_CLIENT_ID`,
//! `XERO_CLIENT_SECRET`) so they never end up in a config file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{AccountCodeMapping, CategoryCode};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/sync.toml");

pub const CLIENT_ID_ENV: &str = "XERO_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "XERO_CLIENT_SECRET";

/// Longest accepted run timeout
pub const MAX_RUN_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Xero endpoints
#[derive(Debug, Clone)]
pub struct XeroEndpoints {
    pub token_url: String,
    pub connections_url: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl Default for XeroEndpoints {
    fn default() -> Self {
        Self {
            token_url: "https://identity.xero.com/connect/token".to_string(),
            connections_url: "https://api.xero.com/connections".to_string(),
            api_base: "https://api.xero.com/api.xro/2.0".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl XeroEndpoints {
    /// Point every endpoint at one base URL (mock servers, proxies)
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            token_url: format!("{}/connect/token", base),
            connections_url: format!("{}/connections", base),
            api_base: format!("{}/api.xro/2.0", base),
            ..Self::default()
        }
    }
}

/// Retry policy for 429, 5xx and network failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based): base * 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Concurrent report requests per tenant
    pub concurrency: usize,
    /// Request pacing per tenant; 0 disables pacing
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
    pub refresh_margin: Duration,
    pub run_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            requests_per_minute: 55,
            retry: RetryPolicy::default(),
            refresh_margin: Duration::from_secs(60),
            run_timeout: Duration::from_secs(900),
        }
    }
}

/// OAuth client credentials for the token endpoint
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// Read from `XERO_CLIENT_ID` / `XERO_CLIENT_SECRET`; None if either is unset or empty
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV).ok().filter(|s| !s.is_empty())?;
        let client_secret = std::env::var(CLIENT_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())?;
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Full sync configuration
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub xero: XeroEndpoints,
    pub sync: SyncSettings,
    /// Tracked categories, in display order
    pub categories: Vec<CategoryCode>,
    /// tenant id -> category -> account code
    pub tenant_overrides: HashMap<String, HashMap<String, String>>,
}

impl SyncConfig {
    /// Load configuration (explicit path, then data-dir override, then embedded default)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?,
            None => match default_config_path() {
                Some(default_path) if default_path.exists() => fs::read_to_string(&default_path)
                    .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?,
                _ => DEFAULT_CONFIG.to_string(),
            },
        };

        Self::parse(&content)
    }

    /// The embedded default configuration
    pub fn embedded() -> Result<Self> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Parse config from TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = SyncConfig::default();

        if let Some(xero) = raw.xero {
            if let Some(url) = xero.token_url {
                config.xero.token_url = url;
            }
            if let Some(url) = xero.connections_url {
                config.xero.connections_url = url;
            }
            if let Some(url) = xero.api_base {
                config.xero.api_base = url.trim_end_matches('/').to_string();
            }
            if let Some(secs) = xero.request_timeout_secs {
                config.xero.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(sync) = raw.sync {
            if let Some(concurrency) = sync.concurrency {
                if concurrency == 0 {
                    return Err(Error::Config("sync.concurrency must be at least 1".into()));
                }
                config.sync.concurrency = concurrency;
            }
            if let Some(rpm) = sync.requests_per_minute {
                config.sync.requests_per_minute = rpm;
            }
            if let Some(attempts) = sync.max_attempts {
                config.sync.retry.max_attempts = attempts.max(1);
            }
            if let Some(ms) = sync.base_delay_ms {
                config.sync.retry.base_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = sync.max_backoff_ms {
                config.sync.retry.max_backoff = Duration::from_millis(ms);
            }
            if let Some(secs) = sync.refresh_margin_secs {
                config.sync.refresh_margin = Duration::from_secs(secs);
            }
            if let Some(secs) = sync.run_timeout_secs {
                if secs == 0 || secs > MAX_RUN_TIMEOUT.as_secs() {
                    return Err(Error::Config(format!(
                        "sync.run_timeout_secs must be between 1 and {}",
                        MAX_RUN_TIMEOUT.as_secs()
                    )));
                }
                config.sync.run_timeout = Duration::from_secs(secs);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for category in raw.categories.unwrap_or_default() {
            if !seen.insert(category.name.clone()) {
                return Err(Error::Config(format!(
                    "Category '{}' is listed twice",
                    category.name
                )));
            }
            config.categories.push(category);
        }

        if let Some(tenants) = raw.tenants {
            for (tenant_id, tenant) in tenants {
                config
                    .tenant_overrides
                    .insert(tenant_id, tenant.codes.unwrap_or_default());
            }
        }

        Ok(config)
    }

    /// Account codes for one tenant: the shared list with that tenant's overrides applied
    ///
    /// Overrides replace codes for known categories; unknown categories are appended.
    pub fn mapping_for(&self, tenant_id: &str) -> AccountCodeMapping {
        let mut entries = self.categories.clone();

        if let Some(overrides) = self.tenant_overrides.get(tenant_id) {
            for entry in entries.iter_mut() {
                if let Some(code) = overrides.get(&entry.name) {
                    entry.code = code.clone();
                }
            }

            let mut extra: Vec<_> = overrides
                .iter()
                .filter(|(name, _)| !self.categories.iter().any(|c| &c.name == *name))
                .map(|(name, code)| CategoryCode {
                    name: name.clone(),
                    code: code.clone(),
                })
                .collect();
            extra.sort_by(|a, b| a.name.cmp(&b.name));
            entries.extend(extra);
        }

        AccountCodeMapping::new(entries)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("centre-sync").join("config").join("sync.toml"))
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    xero: Option<RawXero>,
    sync: Option<RawSync>,
    categories: Option<Vec<CategoryCode>>,
    tenants: Option<HashMap<String, RawTenant>>,
}

#[derive(Debug, Deserialize)]
struct RawXero {
    token_url: Option<String>,
    connections_url: Option<String>,
    api_base: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSync {
    concurrency: Option<usize>,
    requests_per_minute: Option<u32>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    refresh_margin_secs: Option<u64>,
    run_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTenant {
    codes: Option<HashMap<String, String>>,
}
