//! Sync orchestrator
//!
//! Drives one run: enumerate tenants, then for each tenant, as an isolated
//! task, refresh -> fetch -> aggregate. A failure inside one tenant never
//! affects another; the run itself only fails when credentials cannot be
//! listed.
//!
//! Run phases:    Idle -> Enumerating -> PerTenant -> Done
//! Tenant phases: Refreshing -> Fetching -> Aggregating -> Succeeded | Failed


use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate, compare_with_budget, ReportGrid};
use crate::config::{ClientCredentials, SyncConfig, MAX_RUN_TIMEOUT};
use crate::db::Database;
use crate::error::{AuthError, Error, FetchError, Result};
use crate::models::{
    AggregateResult, CellFailure, ReportResult, SyncReport, TenantCredential, TenantFailure,
    TenantOutcome, TenantStatus,
};
use crate::store::{ActualsStore, BudgetStore, CredentialStore};
use crate::xero::{stored_tenants, ReportFetcher, TokenRefresher, XeroClient};

/// Phase of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Enumerating,
    PerTenant,
    Done,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Enumerating) | (Enumerating, PerTenant) | (Enumerating, Done) | (PerTenant, Done)
        )
    }
}

/// Phase of one tenant's workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantPhase {
    Refreshing,
    Fetching,
    Aggregating,
    Succeeded,
    Failed,
}

impl TenantPhase {
    /// Fetching may drop back to Refreshing once, after a 401
    pub fn can_advance_to(self, next: TenantPhase) -> bool {
        use TenantPhase::*;
        matches!(
            (self, next),
            (Refreshing, Fetching)
                | (Refreshing, Failed)
                | (Fetching, Refreshing)
                | (Fetching, Aggregating)
                | (Fetching, Failed)
                | (Aggregating, Succeeded)
                | (Aggregating, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TenantPhase::Succeeded | TenantPhase::Failed)
    }
}

/// Logs and checks tenant phase transitions
struct PhaseTracker<'a> {
    tenant_id: &'a str,
    phase: TenantPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(tenant_id: &'a str) -> Self {
        debug!(tenant_id, phase = ?TenantPhase::Refreshing, "Tenant phase");
        Self {
            tenant_id,
            phase: TenantPhase::Refreshing,
        }
    }

    fn enter(&mut self, next: TenantPhase) {
        if !self.phase.can_advance_to(next) {
            warn!(
                tenant_id = self.tenant_id,
                from = ?self.phase,
                to = ?next,
                "Unexpected tenant phase transition"
            );
        }
        debug!(tenant_id = self.tenant_id, from = ?self.phase, to = ?next, "Tenant phase");
        self.phase = next;
    }
}

fn advance_run(phase: &mut RunPhase, next: RunPhase) {
    if !phase.can_advance_to(next) {
        warn!(from = ?phase, to = ?next, "Unexpected run phase transition");
    }
    debug!(from = ?phase, to = ?next, "Run phase");
    *phase = next;
}

/// What to sync
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub year: i32,
    /// Only sync this tenant
    pub tenant: Option<String>,
}

impl RunOptions {
    pub fn for_year(year: i32) -> Self {
        Self { year, tenant: None }
    }

    pub fn current_year() -> Self {
        Self::for_year(Utc::now().year())
    }

    pub fn tenant(mut self, tenant_id: &str) -> Self {
        self.tenant = Some(tenant_id.to_string());
        self
    }
}

/// Coordinates token refresh, report fan-out and aggregation for every tenant
#[derive(Clone)]
pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    client: XeroClient,
    refresher: Arc<TokenRefresher>,
    credentials: Arc<dyn CredentialStore>,
    budgets: Arc<dyn BudgetStore>,
    actuals: Option<Arc<dyn ActualsStore>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        client_credentials: Option<ClientCredentials>,
        credentials: Arc<dyn CredentialStore>,
        budgets: Arc<dyn BudgetStore>,
    ) -> Result<Self> {
        let client = XeroClient::from_config(&config)?;
        let refresher = TokenRefresher::new(
            client.clone(),
            client_credentials,
            credentials.clone(),
            config.sync.refresh_margin,
        );
        Ok(Self {
            config: Arc::new(config),
            client,
            refresher: Arc::new(refresher),
            credentials,
            budgets,
            actuals: None,
        })
    }

    /// Orchestrator backed by one database for credentials, budgets and actuals
    pub fn with_database(
        config: SyncConfig,
        client_credentials: Option<ClientCredentials>,
        db: Database,
    ) -> Result<Self> {
        let db = Arc::new(db);
        Ok(Self::new(config, client_credentials, db.clone(), db.clone())?.with_actuals_store(db))
    }

    /// Persist each tenant's aggregate after a successful sync
    pub fn with_actuals_store(mut self, actuals: Arc<dyn ActualsStore>) -> Self {
        self.actuals = Some(actuals);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync
    ///
    /// Returns an error only when tenants cannot be enumerated; every tenant
    /// failure is reported inside the `SyncReport`.
    pub async fn run(&self, options: &RunOptions) -> Result<SyncReport> {
        let started_at = Utc::now();
        let mut phase = RunPhase::Idle;

        advance_run(&mut phase, RunPhase::Enumerating);
        let mut tenants = stored_tenants(self.credentials.as_ref())?;
        if let Some(only) = &options.tenant {
            tenants.retain(|t| &t.tenant_id == only);
            if tenants.is_empty() {
                return Err(Error::NotFound(format!("No stored credential for tenant {}", only)));
            }
        }

        if tenants.is_empty() {
            warn!("No tenants with stored credentials; nothing to sync");
            advance_run(&mut phase, RunPhase::Done);
            return Ok(SyncReport {
                year: options.year,
                started_at,
                finished_at: Utc::now(),
                tenants: BTreeMap::new(),
            });
        }

        info!(
            tenants = tenants.len(),
            year = options.year,
            "Starting Xero sync"
        );
        advance_run(&mut phase, RunPhase::PerTenant);

        let deadline = run_deadline(Instant::now(), self.config.sync.run_timeout);
        let mut tasks = JoinSet::new();
        for credential in tenants {
            let orchestrator = self.clone();
            let year = options.year;
            tasks.spawn(async move { orchestrator.isolated_tenant(credential, year, deadline).await });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.tenant_id.clone(), outcome);
                }
                Err(e) => error!("Tenant supervisor task failed: {}", e),
            }
        }

        advance_run(&mut phase, RunPhase::Done);
        let report = SyncReport {
            year: options.year,
            started_at,
            finished_at: Utc::now(),
            tenants: outcomes,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Xero sync finished"
        );
        Ok(report)
    }

    /// Run a tenant in its own task so a panic becomes a `Failed` outcome
    async fn isolated_tenant(
        self,
        credential: TenantCredential,
        year: i32,
        deadline: Instant,
    ) -> TenantOutcome {
        let fallback = credential.clone();
        let orchestrator = self.clone();
        let handle =
            tokio::spawn(async move { orchestrator.sync_tenant(credential, year, deadline).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tenant_id = %fallback.tenant_id, "Tenant sync aborted: {}", e);
                let grid = self.grid_for(&fallback.tenant_id, year);
                self.failed_outcome(
                    &fallback,
                    None,
                    TenantFailure::Aborted {
                        reason: e.to_string(),
                    },
                    grid.empty(),
                    0,
                )
            }
        }
    }

    fn grid_for(&self, tenant_id: &str, year: i32) -> ReportGrid {
        ReportGrid::new(tenant_id, year, self.config.mapping_for(tenant_id))
    }

    /// One tenant's workflow, always ending in a terminal outcome
    pub async fn sync_tenant(
        &self,
        credential: TenantCredential,
        year: i32,
        deadline: Instant,
    ) -> TenantOutcome {
        let tenant_id = credential.tenant_id.clone();
        let grid = self.grid_for(&tenant_id, year);
        let mut tracker = PhaseTracker::new(&tenant_id);

        let credential = match self.refresher.ensure_fresh(&credential, false).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracker.enter(TenantPhase::Failed);
                return self.auth_failed(&credential, None, e, grid.empty(), 0);
            }
        };

        let (credential, tenant_name) = match self.confirm_connection(credential).await {
            Ok(confirmed) => confirmed,
            Err((credential, failure)) => {
                tracker.enter(TenantPhase::Failed);
                return self.failed_outcome(&credential, None, failure, grid.empty(), 0);
            }
        };

        tracker.enter(TenantPhase::Fetching);
        let fetcher = ReportFetcher::new(self.client.clone(), &self.config.sync);
        let jobs = grid.jobs();
        let mut requests_issued = jobs.len();
        info!(
            tenant_id = %tenant_id,
            requests = requests_issued,
            "Fetching Profit & Loss reports"
        );

        let fan_out = fetcher
            .fetch_grid(jobs, &credential.access_token, deadline)
            .await;
        let timed_out = fan_out.timed_out;
        let reissue: Vec<_> = fan_out
            .unauthorized()
            .map(|r| (r.category.clone(), r.request.clone()))
            .collect();
        let mut results = fan_out.results;

        if !reissue.is_empty() && !timed_out {
            warn!(
                tenant_id = %tenant_id,
                cells = reissue.len(),
                "Access token rejected; refreshing and re-issuing"
            );
            tracker.enter(TenantPhase::Refreshing);
            match self.refresher.ensure_fresh(&credential, true).await {
                Ok(fresh) => {
                    tracker.enter(TenantPhase::Fetching);
                    requests_issued += reissue.len();
                    let retry = fetcher
                        .fetch_grid(reissue, &fresh.access_token, deadline)
                        .await;
                    results.extend(retry.results);
                }
                Err(e) => {
                    tracker.enter(TenantPhase::Failed);
                    let partial = aggregate(&grid, &results);
                    return self.auth_failed(
                        &credential,
                        tenant_name,
                        e,
                        partial,
                        requests_issued,
                    );
                }
            }
        }

        tracker.enter(TenantPhase::Aggregating);
        let aggregated = aggregate(&grid, &results);

        if all_issued_failed(&results, &aggregated, &grid) {
            tracker.enter(TenantPhase::Failed);
            warn!(tenant_id = %tenant_id, "Every report request failed");
            return self.failed_outcome(
                &credential,
                tenant_name,
                TenantFailure::AllCellsFailed,
                aggregated,
                requests_issued,
            );
        }

        if let Some(actuals) = &self.actuals {
            if let Err(e) = actuals.save_actuals(&aggregated) {
                tracker.enter(TenantPhase::Failed);
                error!(tenant_id = %tenant_id, "Failed to save actuals: {}", e);
                return self.failed_outcome(
                    &credential,
                    tenant_name,
                    TenantFailure::Store {
                        reason: e.to_string(),
                    },
                    aggregated,
                    requests_issued,
                );
            }
        }

        tracker.enter(TenantPhase::Succeeded);
        let comparison = compare_with_budget(&aggregated, self.budgets.as_ref());
        let cells_failed = aggregated.failed_cells();
        info!(
            tenant_id = %tenant_id,
            requests = requests_issued,
            cells_failed,
            timed_out,
            "Tenant sync succeeded"
        );

        TenantOutcome {
            tenant_id: credential.tenant_id.clone(),
            tenant_name: tenant_name.or_else(|| credential.tenant_name.clone()),
            status: TenantStatus::Succeeded,
            aggregate: aggregated,
            comparison,
            requests_issued,
            cells_failed,
        }
    }

    /// Check the tenant is still in its connections list
    ///
    /// A 401 here forces one refresh. Errors other than 401 don't fail the
    /// tenant: the report requests will surface a real disconnection.
    async fn confirm_connection(
        &self,
        credential: TenantCredential,
    ) -> std::result::Result<(TenantCredential, Option<String>), (TenantCredential, TenantFailure)>
    {
        let mut credential = credential;
        let mut listed = self.client.list_tenants(&credential.access_token).await;

        if matches!(listed, Err(FetchError::Unauthorized)) {
            match self.refresher.ensure_fresh(&credential, true).await {
                Ok(fresh) => {
                    credential = fresh;
                    listed = self.client.list_tenants(&credential.access_token).await;
                }
                Err(e) => {
                    let failure = auth_failure(&e);
                    return Err((credential, failure));
                }
            }
        }

        match listed {
            Ok(tenants) => match tenants.into_iter().find(|t| t.tenant_id == credential.tenant_id) {
                Some(tenant) => {
                    let name = Some(tenant.tenant_name).filter(|n| !n.is_empty());
                    Ok((credential, name))
                }
                None => {
                    warn!(
                        tenant_id = %credential.tenant_id,
                        "Tenant is no longer in its Xero connections"
                    );
                    Err((credential, TenantFailure::Disconnected))
                }
            },
            Err(FetchError::Unauthorized) => Err((
                credential,
                TenantFailure::RequiresReauthorization {
                    reason: "connections rejected a freshly refreshed token".to_string(),
                },
            )),
            Err(e) => {
                warn!(
                    tenant_id = %credential.tenant_id,
                    "Could not confirm connection, continuing: {}",
                    e
                );
                Ok((credential, None))
            }
        }
    }

    fn auth_failed(
        &self,
        credential: &TenantCredential,
        tenant_name: Option<String>,
        err: AuthError,
        aggregate: AggregateResult,
        requests_issued: usize,
    ) -> TenantOutcome {
        warn!(tenant_id = %credential.tenant_id, "Token refresh failed: {}", err);
        self.failed_outcome(
            credential,
            tenant_name,
            auth_failure(&err),
            aggregate,
            requests_issued,
        )
    }

    fn failed_outcome(
        &self,
        credential: &TenantCredential,
        tenant_name: Option<String>,
        failure: TenantFailure,
        aggregate: AggregateResult,
        requests_issued: usize,
    ) -> TenantOutcome {
        let comparison = compare_with_budget(&aggregate, self.budgets.as_ref());
        let cells_failed = aggregate.failed_cells();
        TenantOutcome {
            tenant_id: credential.tenant_id.clone(),
            tenant_name: tenant_name.or_else(|| credential.tenant_name.clone()),
            status: TenantStatus::Failed { failure },
            aggregate,
            comparison,
            requests_issued,
            cells_failed,
        }
    }
}

/// Deadline for a run, capped at `MAX_RUN_TIMEOUT`
fn run_deadline(now: Instant, timeout: std::time::Duration) -> Instant {
    let timeout = timeout.min(MAX_RUN_TIMEOUT);
    now.checked_add(timeout).unwrap_or(now)
}

fn auth_failure(err: &AuthError) -> TenantFailure {
    match err {
        AuthError::Unreachable(reason) => TenantFailure::IdentityUnreachable {
            reason: reason.clone(),
        },
        other => TenantFailure::RequiresReauthorization {
            reason: other.to_string(),
        },
    }
}

/// True when requests were issued and none of the final cells holds an amount
fn all_issued_failed(results: &[ReportResult], aggregate: &AggregateResult, grid: &ReportGrid) -> bool {
    if results.is_empty() {
        return false;
    }
    let mapped: Vec<&str> = grid
        .mapping
        .entries()
        .iter()
        .filter(|e| !e.code.trim().is_empty())
        .map(|e| e.name.as_str())
        .collect();

    aggregate
        .cells()
        .filter(|(category, _, _)| mapped.contains(category))
        .all(|(_, _, cell)| {
            cell.is_failed() && cell.failure.as_ref() != Some(&CellFailure::Unmapped)
        })
}
