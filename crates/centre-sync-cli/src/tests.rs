//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::time::Duration;

use centre_sync_core::test_utils::MockXeroServer;
use centre_sync_core::{
    CategoryCode, CellFailure, ClientCredentials, CredentialStore, Database, RetryPolicy,
    SyncConfig, TenantFailure, TenantStatus,
};

use crate::commands::{self, money, truncate, ScheduleConfig};

fn setup_test_db() -> Database {
    Database::in_memory().unwrap()
}

fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.categories = vec![
        CategoryCode {
            name: "Food Costs".into(),
            code: "6004".into(),
        },
        CategoryCode {
            name: "Nappies and Wipes".into(),
            code: "6005".into(),
        },
    ];
    config.sync.requests_per_minute = 0;
    config.sync.retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
    };
    config
}

fn config_for(server: &MockXeroServer) -> SyncConfig {
    let mut config = test_config();
    config.xero = server.endpoints();
    config
}

fn client_credentials() -> Option<ClientCredentials> {
    Some(ClientCredentials::new("client-id", "client-secret"))
}

// ========== Formatting Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("Papamoa", 10), "Papamoa");
    assert_eq!(truncate("Papamoa Beach Early Learning", 10), "Papamoa...");
}

#[test]
fn test_money() {
    assert_eq!(money(0.0), "0.00");
    assert_eq!(money(3120.0), "3,120.00");
    assert_eq!(money(-120.5), "-120.50");
    assert_eq!(money(1234567.891), "1,234,567.89");
    assert_eq!(money(-0.001), "0.00");
}

// ========== Init Command Tests ==========

#[test]
fn test_cmd_init_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("centre-sync.db");

    commands::cmd_init(&path, &test_config(), true).unwrap();
    assert!(path.exists());

    let db = commands::open_db(&path, true).unwrap();
    assert!(db.list_all().unwrap().is_empty());
}

// ========== Credentials Command Tests ==========

#[test]
fn test_cmd_credentials_add_and_list() {
    let db = setup_test_db();
    commands::cmd_credentials_add(&db, " T1 ", Some("Papamoa Beach"), "a-1", "r-1", 1800).unwrap();

    let stored = db.get("T1").unwrap();
    assert_eq!(stored.tenant_name.as_deref(), Some("Papamoa Beach"));
    assert_eq!(stored.refresh_token, "r-1");

    assert!(commands::cmd_credentials_list(&db).is_ok());
}

#[test]
fn test_cmd_credentials_add_rejects_empty_refresh_token() {
    let db = setup_test_db();
    assert!(commands::cmd_credentials_add(&db, "T1", None, "a-1", "", 1800).is_err());
    assert!(db.list_all().unwrap().is_empty());
}

#[test]
fn test_cmd_credentials_list_empty() {
    let db = setup_test_db();
    assert!(commands::cmd_credentials_list(&db).is_ok());
}

// ========== Budget Command Tests ==========

#[test]
fn test_cmd_budget_set_and_list() {
    let db = setup_test_db();
    let config = test_config();

    commands::cmd_budget_set(&db, &config, "T1", "Food Costs", 2025, 3, 3000.0).unwrap();
    commands::cmd_budget_set(&db, &config, "T1", "Food Costs", 2025, 3, 3200.0).unwrap();

    let budgets = db.list_budgets(Some("T1"), 2025).unwrap();
    assert_eq!(budgets.len(), 1);
    assert_eq!(budgets[0].amount, 3200.0);

    assert!(commands::cmd_budget_list(&db, None, 2025).is_ok());
}

#[test]
fn test_cmd_budget_set_unknown_category() {
    let db = setup_test_db();
    let result = commands::cmd_budget_set(&db, &test_config(), "T1", "Rent", 2025, 3, 10.0);
    assert!(result.is_err());
    assert!(db.list_budgets(None, 2025).unwrap().is_empty());
}

#[test]
fn test_cmd_budget_set_invalid_month() {
    let db = setup_test_db();
    let result = commands::cmd_budget_set(&db, &test_config(), "T1", "Food Costs", 2025, 13, 10.0);
    assert!(result.is_err());
}

// ========== Actuals Command Tests ==========

#[test]
fn test_cmd_actuals_empty() {
    let db = setup_test_db();
    assert!(commands::cmd_actuals(&db, None, 2025).is_ok());
}

// ========== Schedule Tests ==========

#[test]
fn test_schedule_config_resolution() {
    assert_eq!(
        ScheduleConfig::resolve(Some(6)),
        Some(ScheduleConfig { interval_hours: 6 })
    );
    assert_eq!(ScheduleConfig::resolve(Some(0)), None);
    assert_eq!(ScheduleConfig::resolve(Some(u64::MAX)), None);
    assert_eq!(
        ScheduleConfig::resolve(Some(commands::MAX_SCHEDULE_HOURS))
            .unwrap()
            .period(),
        Duration::from_secs(commands::MAX_SCHEDULE_HOURS * 3600)
    );
    assert_eq!(
        ScheduleConfig {
            interval_hours: u64::MAX
        }
        .period(),
        Duration::from_secs(u64::MAX)
    );
    assert_eq!(
        ScheduleConfig::resolve(Some(2)).unwrap().period(),
        Duration::from_secs(7200)
    );

    std::env::set_var(commands::SCHEDULE_HOURS_ENV, "12");
    assert_eq!(
        ScheduleConfig::resolve(None),
        Some(ScheduleConfig { interval_hours: 12 })
    );
    std::env::set_var(commands::SCHEDULE_HOURS_ENV, "daily");
    assert_eq!(ScheduleConfig::from_env(), None);
    std::env::remove_var(commands::SCHEDULE_HOURS_ENV);
    assert_eq!(ScheduleConfig::resolve(None), None);
}

// ========== Sync Command Tests ==========

#[tokio::test]
async fn test_run_sync_persists_actuals() {
    let server = MockXeroServer::start().await;
    server.set_connections(&[("T1", "Papamoa Beach")]);
    server.set_amount("T1", "6004", 2025, 3, 3120.0);

    let db = setup_test_db();
    commands::cmd_credentials_add(&db, "T1", None, "a-1", "r-1", 3600).unwrap();
    db.set_budget("T1", "Food Costs", 2025, 3, 3000.0).unwrap();

    let report = commands::run_sync(db.clone(), config_for(&server), client_credentials(), 2025, None)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    let outcome = &report.tenants["T1"];
    assert_eq!(outcome.requests_issued, 24);
    assert_eq!(
        outcome.comparison.cell("Food Costs", "2025-03-01").unwrap().variance,
        -120.0
    );

    let actuals = db.list_actuals(Some("T1"), 2025).unwrap();
    assert_eq!(actuals.len(), 24);
    assert!(actuals.iter().all(|a| a.failure.is_none()));

    commands::print_report(&report);
    assert!(commands::cmd_actuals(&db, Some("T1"), 2025).is_ok());
}

#[tokio::test]
async fn test_cmd_sync_fails_when_a_tenant_fails() {
    let server = MockXeroServer::start().await;
    server.set_connections(&[("T1", "Papamoa Beach")]);

    let db = setup_test_db();
    commands::cmd_credentials_add(&db, "T1", None, "a-1", "r-1", 3600).unwrap();
    commands::cmd_credentials_add(&db, "T2", None, "a-2", "r-2", 3600).unwrap();

    // T2 is missing from the connections list
    let report = commands::run_sync(db.clone(), config_for(&server), client_credentials(), 2025, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded(), 1);
    assert_eq!(
        report.tenants["T2"].status,
        TenantStatus::Failed {
            failure: TenantFailure::Disconnected
        }
    );
    assert_eq!(
        report.tenants["T2"].aggregate.cell("Food Costs", "2025-01-01").unwrap().failure,
        Some(CellFailure::NotFetched)
    );

    let result = commands::cmd_sync(
        db,
        config_for(&server),
        client_credentials(),
        2025,
        None,
        true,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_sync_single_tenant() {
    let server = MockXeroServer::start().await;
    server.set_connections(&[("T1", "Papamoa Beach"), ("T2", "Mount Maunganui")]);

    let db = setup_test_db();
    commands::cmd_credentials_add(&db, "T1", None, "a-1", "r-1", 3600).unwrap();
    commands::cmd_credentials_add(&db, "T2", None, "a-2", "r-2", 3600).unwrap();

    let result = commands::cmd_sync(
        db.clone(),
        config_for(&server),
        client_credentials(),
        2025,
        Some("T2"),
        false,
    )
    .await;
    assert!(result.is_ok());
    assert!(db.list_actuals(Some("T1"), 2025).unwrap().is_empty());
    assert_eq!(db.list_actuals(Some("T2"), 2025).unwrap().len(), 24);

    let missing = commands::run_sync(
        db,
        config_for(&server),
        client_credentials(),
        2025,
        Some("T9"),
    )
    .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_cmd_tenants_refreshes_expired_credential() {
    let server = MockXeroServer::start().await;
    server.set_connections(&[("T1", "Papamoa Beach")]);

    let db = setup_test_db();
    commands::cmd_credentials_add(&db, "T1", None, "a-1", "r-1", -60).unwrap();

    commands::cmd_tenants(db.clone(), &config_for(&server), client_credentials())
        .await
        .unwrap();

    assert_eq!(server.refresh_tokens_seen(), vec!["r-1".to_string()]);
    let stored = db.get("T1").unwrap();
    assert_eq!(stored.refresh_token, "refresh-1");
    assert_eq!(stored.tenant_name.as_deref(), Some("Papamoa Beach"));
}
