//! Store contracts consumed by the sync pipeline
//!
//! - `CredentialStore` - one OAuth credential per tenant, rotated on refresh
//! - `BudgetStore` - monthly budget figures (read-only here)
//! - `ActualsStore` - destination for synced actuals
//!
//! `Database` (SQLite) implements all three for production use;
//! `MemoryStore` implements them in-process for tests and dry runs.
//! Store calls are synchronous: the only suspension points in a sync run are
//! HTTP requests.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{AggregateResult, CredentialUpdate, TenantCredential};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable per-tenant OAuth credentials
pub trait CredentialStore: Send + Sync {
    /// Fetch one tenant's credential
    fn get(&self, tenant_id: &str) -> StoreResult<TenantCredential>;

    /// All tenants with stored credentials
    fn list_all(&self) -> StoreResult<Vec<TenantCredential>>;

    /// Write a refreshed token pair
    ///
    /// Implementations must apply the write only if the stored refresh token
    /// still equals `update.previous_refresh_token`, returning
    /// `StoreError::Conflict` otherwise.
    fn update(&self, tenant_id: &str, update: &CredentialUpdate) -> StoreResult<()>;

    /// Insert or replace a credential (initial authorization)
    fn upsert(&self, credential: &TenantCredential) -> StoreResult<()>;
}

/// Monthly budget figures
pub trait BudgetStore: Send + Sync {
    /// Budget for one category and month; `None` when no budget was set
    fn monthly_budget(
        &self,
        tenant_id: &str,
        category: &str,
        year: i32,
        month: u32,
    ) -> StoreResult<Option<f64>>;
}

/// Persisted actuals from completed syncs
pub trait ActualsStore: Send + Sync {
    /// Replace the tenant's actuals for the aggregate's year
    fn save_actuals(&self, aggregate: &AggregateResult) -> StoreResult<()>;
}
