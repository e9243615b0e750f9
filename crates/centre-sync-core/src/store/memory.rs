//! In-process store for tests and embedding

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{ActualsStore, BudgetStore, CredentialStore, StoreResult};
use crate::error::StoreError;
use crate::models::{AggregateResult, CredentialUpdate, TenantCredential};

type BudgetKey = (String, String, i32, u32);

#[derive(Default)]
pub struct MemoryStore {
    credentials: Mutex<HashMap<String, TenantCredential>>,
    budgets: Mutex<HashMap<BudgetKey, f64>>,
    actuals: Mutex<HashMap<(String, i32), AggregateResult>>,
    credential_writes: AtomicUsize,
    fail_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: impl IntoIterator<Item = TenantCredential>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.credentials.lock() {
            for credential in credentials {
                map.insert(credential.tenant_id.clone(), credential);
            }
        }
        store
    }

    pub fn set_budget(&self, tenant_id: &str, category: &str, year: i32, month: u32, amount: f64) {
        if let Ok(mut budgets) = self.budgets.lock() {
            budgets.insert(
                (tenant_id.to_string(), category.to_string(), year, month),
                amount,
            );
        }
    }

    /// Number of successful credential updates (refresh write-throughs)
    pub fn credential_writes(&self) -> usize {
        self.credential_writes.load(Ordering::SeqCst)
    }

    /// Make every credential update fail with `StoreError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn actuals(&self, tenant_id: &str, year: i32) -> Option<AggregateResult> {
        self.actuals
            .lock()
            .ok()?
            .get(&(tenant_id.to_string(), year))
            .cloned()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, tenant_id: &str) -> StoreResult<TenantCredential> {
        lock(&self.credentials)?
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(tenant_id.to_string()))
    }

    fn list_all(&self) -> StoreResult<Vec<TenantCredential>> {
        let mut all: Vec<_> = lock(&self.credentials)?.values().cloned().collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(all)
    }

    fn update(&self, tenant_id: &str, update: &CredentialUpdate) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }

        let mut credentials = lock(&self.credentials)?;
        let credential = credentials
            .get_mut(tenant_id)
            .ok_or_else(|| StoreError::NotFound(tenant_id.to_string()))?;

        if credential.refresh_token != update.previous_refresh_token {
            return Err(StoreError::Conflict(tenant_id.to_string()));
        }

        credential.access_token = update.access_token.clone();
        credential.refresh_token = update.refresh_token.clone();
        credential.expires_at = update.expires_at;
        credential.updated_at = update.updated_at;
        self.credential_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn upsert(&self, credential: &TenantCredential) -> StoreResult<()> {
        lock(&self.credentials)?.insert(credential.tenant_id.clone(), credential.clone());
        Ok(())
    }
}

impl BudgetStore for MemoryStore {
    fn monthly_budget(
        &self,
        tenant_id: &str,
        category: &str,
        year: i32,
        month: u32,
    ) -> StoreResult<Option<f64>> {
        Ok(lock(&self.budgets)?
            .get(&(tenant_id.to_string(), category.to_string(), year, month))
            .copied())
    }
}

impl ActualsStore for MemoryStore {
    fn save_actuals(&self, aggregate: &AggregateResult) -> StoreResult<()> {
        lock(&self.actuals)?.insert(
            (aggregate.tenant_id.clone(), aggregate.year),
            aggregate.clone(),
        );
        Ok(())
    }
}
