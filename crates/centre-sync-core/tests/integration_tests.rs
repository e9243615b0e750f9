//! Integration tests for centre-sync-core
//!
//! These tests exercise the parse -> aggregate -> compare -> persist workflow
//! against a real (unencrypted, temporary) database.

use centre_sync_core::models::CredentialUpdate;
use centre_sync_core::{
    aggregate, compare_with_budget, extract_amount, summary, AccountCodeMapping, ActualsStore,
    CategoryCode, Cell, CellFailure, CredentialStore, Database, ReportGrid, ReportResult,
    StoreError, SyncConfig, TenantCredential,
};
use chrono::{Duration, Utc};

/// Report body shaped like a real single-month Xero Profit & Loss response
fn food_costs_report(amount: &str) -> String {
    format!(
        r#"{{
  "Id": "c1b2",
  "Status": "OK",
  "ProviderName": "Centre Dashboard",
  "Reports": [{{
    "ReportID": "ProfitAndLoss",
    "ReportName": "Profit and Loss",
    "ReportType": "ProfitAndLoss",
    "ReportTitles": ["Profit & Loss", "Papamoa Beach", "1 March 2025 to 31 March 2025"],
    "Rows": [
      {{"RowType": "Header", "Cells": [{{"Value": ""}}, {{"Value": "31 Mar 25"}}]}},
      {{"RowType": "Section", "Title": "Income", "Rows": []}},
      {{"RowType": "Section", "Title": "Less Operating Expenses", "Rows": [
        {{"RowType": "Row", "Cells": [
          {{"Value": "Food Costs", "Attributes": [{{"Value": "6004", "Id": "account"}}]}},
          {{"Value": "{}", "Attributes": [{{"Value": "6004", "Id": "account"}}]}}
        ]}},
        {{"RowType": "SummaryRow", "Cells": [{{"Value": "Total Operating Expenses"}}, {{"Value": "{}"}}]}}
      ]}},
      {{"RowType": "Section", "Rows": [
        {{"RowType": "Row", "Cells": [{{"Value": "Net Profit"}}, {{"Value": "-{}"}}]}}
      ]}}
    ]
  }}]
}}"#,
        amount, amount, amount
    )
}

fn food_grid() -> ReportGrid {
    ReportGrid::new(
        "T1",
        2025,
        AccountCodeMapping::new(vec![CategoryCode {
            name: "Food Costs".into(),
            code: "6004".into(),
        }]),
    )
}

fn credential() -> TenantCredential {
    let now = Utc::now();
    TenantCredential {
        tenant_id: "T1".into(),
        tenant_name: Some("Papamoa Beach".into()),
        access_token: "access-0".into(),
        refresh_token: "refresh-0".into(),
        expires_at: now + Duration::minutes(30),
        updated_at: now,
    }
}

// =============================================================================
// Parse -> aggregate -> compare -> persist
// =============================================================================

#[test]
fn test_full_sync_workflow_without_network() {
    let db = Database::in_memory().expect("Failed to create test database");
    db.set_budget("T1", "Food Costs", 2025, 3, 3000.0).unwrap();

    let grid = food_grid();
    let jobs = grid.jobs();
    assert_eq!(jobs.len(), 12);

    // March parses from a real-shaped body, April was rate limited
    let results: Vec<ReportResult> = jobs
        .into_iter()
        .filter(|(_, request)| request.month == 3 || request.month == 4)
        .map(|(category, request)| {
            let outcome = if request.month == 3 {
                Ok(extract_amount(&food_costs_report("3,120.00"), &request.account_code).unwrap())
            } else {
                Err(CellFailure::RateLimited { attempts: 3 })
            };
            ReportResult {
                category,
                request,
                outcome,
            }
        })
        .collect();

    let aggregated = aggregate(&grid, &results);
    assert_eq!(aggregated.cell("Food Costs", "2025-03-01"), Some(&Cell::actual(3120.0)));
    assert_eq!(
        aggregated.cell("Food Costs", "2025-04-01"),
        Some(&Cell::failed(CellFailure::RateLimited { attempts: 3 }))
    );
    assert_eq!(
        aggregated.cell("Food Costs", "2025-05-01"),
        Some(&Cell::failed(CellFailure::NotFetched))
    );

    let comparison = compare_with_budget(&aggregated, &db);
    assert_eq!(comparison.cell("Food Costs", "2025-03-01").unwrap().variance, -120.0);

    let totals = summary(&comparison);
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].actual, 3120.0);
    assert_eq!(totals[0].failed_months, 11);

    db.save_actuals(&aggregated).unwrap();
    let stored = db.list_actuals(Some("T1"), 2025).unwrap();
    assert_eq!(stored.len(), 12);
    let april = stored.iter().find(|a| a.month_key == "2025-04-01").unwrap();
    assert_eq!(april.amount, 0.0);
    assert_eq!(april.failure, Some(CellFailure::RateLimited { attempts: 3 }));

    // Saving again replaces rather than duplicates
    db.save_actuals(&aggregated).unwrap();
    assert_eq!(db.list_actuals(Some("T1"), 2025).unwrap().len(), 12);
}

#[test]
fn test_account_absent_from_report_is_zero() {
    let raw = food_costs_report("55.00");
    assert_eq!(extract_amount(&raw, "6004").unwrap(), 55.0);
    assert_eq!(extract_amount(&raw, "6013").unwrap(), 0.0);
}

// =============================================================================
// Credential store
// =============================================================================

#[test]
fn test_credential_rotation_is_conditional() {
    let db = Database::in_memory().expect("Failed to create test database");
    db.upsert(&credential()).unwrap();

    let now = Utc::now();
    let update = CredentialUpdate {
        access_token: "access-1".into(),
        refresh_token: "refresh-1".into(),
        expires_at: now + Duration::minutes(30),
        updated_at: now,
        previous_refresh_token: "refresh-0".into(),
    };
    db.update("T1", &update).unwrap();

    let stored = db.get("T1").unwrap();
    assert_eq!(stored.refresh_token, "refresh-1");
    assert_eq!(stored.tenant_name.as_deref(), Some("Papamoa Beach"));

    // A second writer that exchanged the old token loses
    let stale = CredentialUpdate {
        refresh_token: "refresh-2".into(),
        ..update
    };
    assert!(matches!(db.update("T1", &stale), Err(StoreError::Conflict(_))));
    assert_eq!(db.get("T1").unwrap().refresh_token, "refresh-1");

    assert!(matches!(db.get("missing"), Err(StoreError::NotFound(_))));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_embedded_config_tracks_centre_categories() {
    let config = SyncConfig::embedded().unwrap();
    assert_eq!(config.categories.len(), 13);
    assert_eq!(config.sync.concurrency, 4);

    let mapping = config.mapping_for("any-tenant");
    assert_eq!(mapping.code_for("Food Costs"), Some("6004"));
    assert_eq!(ReportGrid::new("any-tenant", 2025, mapping).jobs().len(), 13 * 12);
}
