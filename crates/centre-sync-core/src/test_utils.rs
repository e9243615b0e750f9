//! Test utilities for centre-sync-core
//!
//! This module provides a mock Xero server (identity, connections and
//! Profit & Loss endpoints) that can be used for development and
//! integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::oneshot;

use crate::config::XeroEndpoints;
use crate::period::month_key;

/// (tenant id, account code, month key)
type ReportKey = (String, String, String);

/// A report request as the mock server saw it
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub tenant_id: String,
    pub account_code: String,
    pub from_date: String,
    pub to_date: String,
    pub bearer: String,
}

#[derive(Default)]
struct MockState {
    token_responses: Mutex<VecDeque<(u16, String)>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    basic_auth_seen: Mutex<Vec<String>>,
    issued: AtomicUsize,

    connections: Mutex<Vec<(String, String)>>,
    connection_requests: AtomicUsize,

    revoked: Mutex<HashSet<String>>,
    amounts: Mutex<HashMap<ReportKey, f64>>,
    scripted: Mutex<HashMap<ReportKey, VecDeque<(u16, String)>>>,
    report_delay: Mutex<Option<Duration>>,
    report_queries: Mutex<Vec<ReportQuery>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Mock Xero server for testing and development
pub struct MockXeroServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockXeroServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/connect/token", post(handle_token))
            .route("/connections", get(handle_connections))
            .route("/api.xro/2.0/Reports/ProfitAndLoss", get(handle_report))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Endpoints pointing at this server
    pub fn endpoints(&self) -> XeroEndpoints {
        XeroEndpoints::with_base_url(&self.url())
    }

    /// Tenants returned by `/connections`
    pub fn set_connections(&self, tenants: &[(&str, &str)]) {
        *self.state.connections.lock().unwrap() = tenants
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
    }

    /// Queue a token endpoint response; when the queue is empty a fresh pair is issued
    pub fn push_token_response(&self, status: u16, body: &str) {
        self.state
            .token_responses
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    /// Reject this access token with 401 on every API endpoint
    pub fn revoke_access_token(&self, token: &str) {
        self.state.revoked.lock().unwrap().insert(token.to_string());
    }

    /// Amount reported for an account in a month (default is no row, i.e. zero)
    pub fn set_amount(&self, tenant_id: &str, code: &str, year: i32, month: u32, amount: f64) {
        self.state
            .amounts
            .lock()
            .unwrap()
            .insert(report_key(tenant_id, code, year, month), amount);
    }

    /// Queue a raw response for one cell, served before the configured amount
    pub fn push_report_response(
        &self,
        tenant_id: &str,
        code: &str,
        year: i32,
        month: u32,
        status: u16,
        body: &str,
    ) {
        self.state
            .scripted
            .lock()
            .unwrap()
            .entry(report_key(tenant_id, code, year, month))
            .or_default()
            .push_back((status, body.to_string()));
    }

    /// Delay every report response
    pub fn set_report_delay(&self, delay: Duration) {
        *self.state.report_delay.lock().unwrap() = Some(delay);
    }

    pub fn report_requests(&self) -> usize {
        self.state.report_queries.lock().unwrap().len()
    }

    pub fn report_requests_for(&self, tenant_id: &str, code: &str, year: i32, month: u32) -> usize {
        let from = month_key(year, month).unwrap();
        self.state
            .report_queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.tenant_id == tenant_id && q.account_code == code && q.from_date == from)
            .count()
    }

    pub fn report_queries(&self) -> Vec<ReportQuery> {
        self.state.report_queries.lock().unwrap().clone()
    }

    /// Highest number of report requests handled at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> usize {
        self.state.refresh_tokens_seen.lock().unwrap().len()
    }

    /// Refresh tokens presented to the token endpoint, in order
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().unwrap().clone()
    }

    /// Authorization headers presented to the token endpoint
    pub fn basic_auth_seen(&self) -> Vec<String> {
        self.state.basic_auth_seen.lock().unwrap().clone()
    }

    pub fn connection_requests(&self) -> usize {
        self.state.connection_requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockXeroServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-month report body with one account row
pub fn profit_and_loss_body(account_code: &str, amount: f64) -> String {
    serde_json::json!({
        "Id": "mock",
        "Status": "OK",
        "Reports": [{
            "ReportID": "ProfitAndLoss",
            "ReportName": "Profit and Loss",
            "Rows": [
                {"RowType": "Header", "Cells": [{"Value": ""}, {"Value": "This Month"}]},
                {"RowType": "Section", "Title": "Less Operating Expenses", "Rows": [
                    {"RowType": "Row", "Cells": [
                        {"Value": "Account", "Attributes": [{"Value": account_code, "Id": "account"}]},
                        {"Value": format!("{:.2}", amount), "Attributes": [{"Value": account_code, "Id": "account"}]}
                    ]}
                ]}
            ]
        }]
    })
    .to_string()
}

/// Report body for an account with no activity
pub fn empty_report_body() -> String {
    serde_json::json!({
        "Reports": [{
            "ReportName": "Profit and Loss",
            "Rows": [{"RowType": "Header", "Cells": [{"Value": ""}, {"Value": "This Month"}]}]
        }]
    })
    .to_string()
}

fn report_key(tenant_id: &str, code: &str, year: i32, month: u32) -> ReportKey {
    (
        tenant_id.to_string(),
        code.to_string(),
        month_key(year, month).unwrap(),
    )
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string()
}

fn json_response(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Identity token endpoint
async fn handle_token(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.basic_auth_seen.lock().unwrap().push(auth.to_string());
    }
    state
        .refresh_tokens_seen
        .lock()
        .unwrap()
        .push(form.get("refresh_token").cloned().unwrap_or_default());

    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return json_response(400, r#"{"error":"unsupported_grant_type"}"#.to_string());
    }

    if let Some((status, body)) = state.token_responses.lock().unwrap().pop_front() {
        return json_response(status, body);
    }

    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    json_response(
        200,
        serde_json::json!({
            "access_token": format!("access-{}", n),
            "refresh_token": format!("refresh-{}", n),
            "expires_in": 1800,
            "token_type": "Bearer",
        })
        .to_string(),
    )
}

/// Connections endpoint
async fn handle_connections(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.connection_requests.fetch_add(1, Ordering::SeqCst);
    if state.revoked.lock().unwrap().contains(&bearer(&headers)) {
        return json_response(401, r#"{"Title":"Unauthorized"}"#.to_string());
    }

    let tenants: Vec<serde_json::Value> = state
        .connections
        .lock()
        .unwrap()
        .iter()
        .map(|(id, name)| {
            serde_json::json!({
                "id": format!("conn-{}", id),
                "tenantId": id,
                "tenantName": name,
                "tenantType": "ORGANISATION",
            })
        })
        .collect();
    json_response(200, serde_json::Value::Array(tenants).to_string())
}

/// Profit & Loss endpoint
async fn handle_report(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = ReportQuery {
        tenant_id: headers
            .get("xero-tenant-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        account_code: params.get("accountCodes").cloned().unwrap_or_default(),
        from_date: params.get("fromDate").cloned().unwrap_or_default(),
        to_date: params.get("toDate").cloned().unwrap_or_default(),
        bearer: bearer(&headers),
    };
    state.report_queries.lock().unwrap().push(query.clone());

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let delay = *state.report_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let response = report_response(&state, &query);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

fn report_response(state: &MockState, query: &ReportQuery) -> Response {
    if state.revoked.lock().unwrap().contains(&query.bearer) {
        return json_response(401, r#"{"Title":"Unauthorized"}"#.to_string());
    }

    let key = (
        query.tenant_id.clone(),
        query.account_code.clone(),
        query.from_date.clone(),
    );

    let scripted = state
        .scripted
        .lock()
        .unwrap()
        .get_mut(&key)
        .and_then(|queue| queue.pop_front());
    if let Some((status, body)) = scripted {
        return json_response(status, body);
    }

    match state.amounts.lock().unwrap().get(&key) {
        Some(amount) => json_response(200, profit_and_loss_body(&query.account_code, *amount)),
        None => json_response(200, empty_report_body()),
    }
}
