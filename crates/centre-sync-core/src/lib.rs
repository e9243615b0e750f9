//! Centre Sync Core Library
//!
//! Xero synchronization pipeline for childcare centre budgets:
//! - OAuth token refresh with rotating refresh tokens
//! - Tenant enumeration via the connections endpoint
//! - Rate-limited Profit & Loss fan-out (tenant x account code x month)
//! - Report tree parsing
//! - Budget-vs-actual aggregation
//! - Per-tenant isolated sync orchestration
//! - SQLite (SQLCipher) credential, budget and actuals stores

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod period;
pub mod report;
pub mod store;
pub mod sync;
pub mod xero;

/// Test utilities including mock Xero server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregate::{aggregate, compare_with_budget, summary, CategorySummary, ReportGrid};
pub use config::{ClientCredentials, RetryPolicy, SyncConfig, SyncSettings, XeroEndpoints};
pub use db::{BudgetEntry, Database, StoredActual};
pub use error::{AuthError, Error, FetchError, Result, StoreError};
pub use models::{
    AccountCodeMapping, AggregateResult, BudgetCell, BudgetComparison, CategoryCode, Cell,
    CellFailure, ReportRequest, ReportResult, SyncReport, Tenant, TenantCredential,
    TenantFailure, TenantOutcome, TenantStatus,
};
pub use period::MonthPeriod;
pub use report::{extract_amount, ProfitAndLossReport};
pub use store::{ActualsStore, BudgetStore, CredentialStore, MemoryStore};
pub use sync::{RunOptions, SyncOrchestrator};
pub use xero::{ReportFetcher, TokenRefresher, XeroClient};
