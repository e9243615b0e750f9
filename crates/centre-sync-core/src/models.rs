//! Domain models for centre-sync

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::period::MonthPeriod;

/// OAuth credential for one Xero tenant (one centre's organisation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCredential {
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantCredential {
    /// True when the access token is inside the safety margin (or already expired)
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at - now <= margin
    }

    /// Name for display, falling back to the tenant id
    pub fn display_name(&self) -> &str {
        self.tenant_name.as_deref().unwrap_or(&self.tenant_id)
    }
}

/// Token pair written back after a successful refresh
///
/// `previous_refresh_token` is the token that was exchanged. Stores use it to
/// reject a write when another refresh already rotated the record.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub previous_refresh_token: String,
}

/// A tenant reachable through the Xero connections endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "tenantName", default)]
    pub tenant_name: String,
}

/// One tracked budget category and the Xero account code it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCode {
    pub name: String,
    pub code: String,
}

/// Ordered (category, account code) pairs for one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountCodeMapping {
    entries: Vec<CategoryCode>,
}

impl AccountCodeMapping {
    pub fn new(entries: Vec<CategoryCode>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CategoryCode] {
        &self.entries
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn code_for(&self, category: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == category)
            .map(|e| e.code.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unit of fan-out: one Profit & Loss request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportRequest {
    pub tenant_id: String,
    pub account_code: String,
    pub year: i32,
    pub month: u32,
}

impl ReportRequest {
    pub fn period(&self) -> Option<MonthPeriod> {
        MonthPeriod::new(self.year, self.month)
    }
}

/// Why an aggregate cell holds zero instead of a parsed amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellFailure {
    RateLimited { attempts: u32 },
    Transient { attempts: u32, message: String },
    Malformed { detail: String },
    Unauthorized,
    Rejected { status: u16 },
    /// The run deadline passed before the request settled
    TimedOut,
    /// No request was issued (tenant failed before fetching)
    NotFetched,
    /// The tenant has no account code for this category
    Unmapped,
}

impl CellFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Malformed { .. } => "malformed",
            Self::Unauthorized => "unauthorized",
            Self::Rejected { .. } => "rejected",
            Self::TimedOut => "timed_out",
            Self::NotFetched => "not_fetched",
            Self::Unmapped => "unmapped",
        }
    }
}

impl From<FetchError> for CellFailure {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::RateLimited { attempts } => Self::RateLimited { attempts },
            FetchError::Transient { attempts, message } => Self::Transient { attempts, message },
            FetchError::Malformed(detail) => Self::Malformed { detail },
            FetchError::Unauthorized => Self::Unauthorized,
            FetchError::Rejected { status } => Self::Rejected { status },
        }
    }
}

impl std::fmt::Display for CellFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { attempts } => write!(f, "rate limited ({} attempts)", attempts),
            Self::Transient { attempts, message } => {
                write!(f, "transient error ({} attempts): {}", attempts, message)
            }
            Self::Malformed { detail } => write!(f, "malformed response: {}", detail),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Rejected { status } => write!(f, "rejected (HTTP {})", status),
            Self::TimedOut => write!(f, "timed out"),
            Self::NotFetched => write!(f, "not fetched"),
            Self::Unmapped => write!(f, "no account code"),
        }
    }
}

/// Outcome of one report request
#[derive(Debug, Clone, PartialEq)]
pub struct ReportResult {
    pub category: String,
    pub request: ReportRequest,
    pub outcome: std::result::Result<f64, CellFailure>,
}

/// One (category, month) cell of an aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CellFailure>,
}

impl Cell {
    pub fn actual(amount: f64) -> Self {
        Self {
            amount,
            failure: None,
        }
    }

    pub fn failed(failure: CellFailure) -> Self {
        Self {
            amount: 0.0,
            failure: Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Category -> month key (`YYYY-MM-01`) -> cell, for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub tenant_id: String,
    pub year: i32,
    pub categories: BTreeMap<String, BTreeMap<String, Cell>>,
}

impl AggregateResult {
    pub fn cell(&self, category: &str, month_key: &str) -> Option<&Cell> {
        self.categories.get(category)?.get(month_key)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &str, &Cell)> {
        self.categories.iter().flat_map(|(category, months)| {
            months
                .iter()
                .map(move |(month, cell)| (category.as_str(), month.as_str(), cell))
        })
    }

    pub fn failed_cells(&self) -> usize {
        self.cells().filter(|(_, _, c)| c.is_failed()).count()
    }
}

/// Budget vs actual for one (category, month)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCell {
    pub budget: f64,
    pub actual: f64,
    /// budget - actual
    pub variance: f64,
    pub actual_failed: bool,
    pub budget_missing: bool,
}

/// Category -> month key -> budget cell, for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparison {
    pub tenant_id: String,
    pub year: i32,
    pub categories: BTreeMap<String, BTreeMap<String, BudgetCell>>,
}

impl BudgetComparison {
    pub fn cell(&self, category: &str, month_key: &str) -> Option<&BudgetCell> {
        self.categories.get(category)?.get(month_key)
    }
}

/// Why a tenant's sync ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenantFailure {
    /// Refresh token rejected or consumed; a user has to reconnect Xero
    RequiresReauthorization { reason: String },
    /// The identity server could not be reached to refresh the token
    IdentityUnreachable { reason: String },
    /// The tenant no longer appears in its connections list
    Disconnected,
    /// Every issued request failed
    AllCellsFailed,
    Store { reason: String },
    /// The tenant's task panicked or was cancelled
    Aborted { reason: String },
}

impl std::fmt::Display for TenantFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequiresReauthorization { reason } => {
                write!(f, "requires re-authorization: {}", reason)
            }
            Self::IdentityUnreachable { reason } => {
                write!(f, "identity server unreachable: {}", reason)
            }
            Self::Disconnected => write!(f, "tenant is no longer connected"),
            Self::AllCellsFailed => write!(f, "every report request failed"),
            Self::Store { reason } => write!(f, "store error: {}", reason),
            Self::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

/// Terminal state of one tenant's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TenantStatus {
    Succeeded,
    Failed { failure: TenantFailure },
}

impl TenantStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Per-tenant result of a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantOutcome {
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    pub status: TenantStatus,
    /// Always covers the full category x month grid
    pub aggregate: AggregateResult,
    pub comparison: BudgetComparison,
    pub requests_issued: usize,
    pub cells_failed: usize,
}

/// Result of a whole sync run: one outcome per tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub year: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tenants: BTreeMap<String, TenantOutcome>,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.tenants
            .values()
            .filter(|t| t.status.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tenants.len() - self.succeeded()
    }
}
