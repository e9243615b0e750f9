//! Profit & Loss report requests and the per-tenant fan-out

use std::sync::Arc;

use reqwest::header::ACCEPT;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{snippet, RequestPacer, XeroClient};
use crate::config::SyncSettings;
use crate::error::FetchError;
use crate::models::{CellFailure, ReportRequest, ReportResult};
use crate::report::ProfitAndLossReport;

/// Header that selects the organisation a request applies to
const TENANT_HEADER: &str = "Xero-tenant-id";

impl XeroClient {
    /// Fetch the raw single-month Profit & Loss body for one account code
    pub async fn fetch_report(
        &self,
        request: &ReportRequest,
        access_token: &str,
        pacer: Option<&RequestPacer>,
    ) -> Result<String, FetchError> {
        let period = request.period().ok_or_else(|| {
            FetchError::Malformed(format!("invalid period {}-{}", request.year, request.month))
        })?;
        let url = format!("{}/Reports/ProfitAndLoss", self.endpoints().api_base);
        let from_date = period.from_date();
        let to_date = period.to_date();

        self.send_with_retry(
            || {
                self.http()
                    .get(&url)
                    .query(&[
                        ("fromDate", from_date.as_str()),
                        ("toDate", to_date.as_str()),
                        ("accountCodes", request.account_code.as_str()),
                    ])
                    .bearer_auth(access_token)
                    .header(TENANT_HEADER, &request.tenant_id)
                    .header(ACCEPT, "application/json")
            },
            pacer,
        )
        .await
    }
}

/// Results of one fan-out, in job order
#[derive(Debug)]
pub struct FanOut {
    pub results: Vec<ReportResult>,
    /// The deadline passed with requests still outstanding
    pub timed_out: bool,
}

impl FanOut {
    /// Results that failed with a rejected access token
    pub fn unauthorized(&self) -> impl Iterator<Item = &ReportResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Err(CellFailure::Unauthorized)))
    }
}

/// Issues report requests for one tenant under a concurrency cap and a pacer
#[derive(Clone)]
pub struct ReportFetcher {
    client: XeroClient,
    permits: Arc<Semaphore>,
    pacer: Arc<RequestPacer>,
}

impl ReportFetcher {
    pub fn new(client: XeroClient, settings: &SyncSettings) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            pacer: Arc::new(RequestPacer::per_minute(settings.requests_per_minute)),
        }
    }

    /// Fetch and parse one cell
    pub async fn fetch_amount(
        &self,
        request: &ReportRequest,
        access_token: &str,
    ) -> Result<f64, FetchError> {
        let body = self
            .client
            .fetch_report(request, access_token, Some(&self.pacer))
            .await?;

        let report = ProfitAndLossReport::from_json(&body).map_err(|e| {
            warn!(
                tenant_id = %request.tenant_id,
                account_code = %request.account_code,
                month = request.month,
                "Unreadable report body: {} ({})",
                e,
                snippet(&body)
            );
            FetchError::Malformed(e.to_string())
        })?;

        if let Some(columns) = report.unexpected_period_columns() {
            warn!(
                tenant_id = %request.tenant_id,
                account_code = %request.account_code,
                month = request.month,
                ?columns,
                "Report does not have a single period column; amount may be misread"
            );
        }

        Ok(report.amount_for_account(&request.account_code))
    }

    /// Fetch every job concurrently, stopping at `deadline`
    ///
    /// Jobs are `(category, request)` pairs. Every job yields exactly one
    /// result: requests still in flight at the deadline are cancelled and
    /// reported as `TimedOut`.
    pub async fn fetch_grid(
        &self,
        jobs: Vec<(String, ReportRequest)>,
        access_token: &str,
        deadline: Instant,
    ) -> FanOut {
        let mut tasks = JoinSet::new();
        for (idx, (_, request)) in jobs.iter().enumerate() {
            let fetcher = self.clone();
            let request = request.clone();
            let token = access_token.to_string();
            tasks.spawn(async move {
                let _permit = fetcher.permits.clone().acquire_owned().await.ok();
                let outcome = fetcher
                    .fetch_amount(&request, &token)
                    .await
                    .map_err(CellFailure::from);
                (idx, outcome)
            });
        }

        let mut settled: Vec<Option<Result<f64, CellFailure>>> = vec![None; jobs.len()];
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, outcome)) => settled[idx] = Some(outcome),
                    Err(e) => warn!("Report task did not complete: {}", e),
                }
            }
        };
        let timed_out = tokio::time::timeout_at(deadline, collect).await.is_err();
        if timed_out {
            tasks.abort_all();
        }

        let results: Vec<ReportResult> = jobs
            .into_iter()
            .zip(settled)
            .map(|((category, request), outcome)| ReportResult {
                category,
                request,
                outcome: outcome.unwrap_or(Err(if timed_out {
                    CellFailure::TimedOut
                } else {
                    CellFailure::NotFetched
                })),
            })
            .collect();

        debug!(
            requests = results.len(),
            failed = results.iter().filter(|r| r.outcome.is_err()).count(),
            timed_out,
            "Report fan-out finished"
        );

        FanOut { results, timed_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, XeroEndpoints};
    use crate::test_utils::MockXeroServer;
    use std::time::Duration;

    fn settings(concurrency: usize) -> SyncSettings {
        SyncSettings {
            concurrency,
            requests_per_minute: 0,
            retry: fast_retry(),
            ..SyncSettings::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn client(server: &MockXeroServer) -> XeroClient {
        XeroClient::new(XeroEndpoints::with_base_url(&server.url()), fast_retry()).unwrap()
    }

    fn request(code: &str, month: u32) -> ReportRequest {
        ReportRequest {
            tenant_id: "T1".into(),
            account_code: code.into(),
            year: 2025,
            month,
        }
    }

    #[tokio::test]
    async fn test_fetch_report_sends_month_range_and_tenant() {
        let server = MockXeroServer::start().await;
        server.set_amount("T1", "6004", 2025, 2, 812.5);
        let fetcher = ReportFetcher::new(client(&server), &settings(2));

        let amount = fetcher
            .fetch_amount(&request("6004", 2), "access")
            .await
            .unwrap();
        assert_eq!(amount, 812.5);

        let seen = server.report_queries();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from_date, "2025-02-01");
        assert_eq!(seen[0].to_date, "2025-02-28");
        assert_eq!(seen[0].tenant_id, "T1");
        assert_eq!(seen[0].bearer, "access");
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_attempts() {
        let server = MockXeroServer::start().await;
        for _ in 0..3 {
            server.push_report_response("T1", "6004", 2025, 4, 429, "");
        }
        let fetcher = ReportFetcher::new(client(&server), &settings(1));

        let err = fetcher
            .fetch_amount(&request("6004", 4), "access")
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::RateLimited { attempts: 3 });
        assert_eq!(server.report_requests(), 3);
    }

    #[tokio::test]
    async fn test_server_error_then_success_is_retried() {
        let server = MockXeroServer::start().await;
        server.push_report_response("T1", "6004", 2025, 5, 503, "unavailable");
        server.set_amount("T1", "6004", 2025, 5, 77.0);
        let fetcher = ReportFetcher::new(client(&server), &settings(1));

        let amount = fetcher
            .fetch_amount(&request("6004", 5), "access")
            .await
            .unwrap();
        assert_eq!(amount, 77.0);
        assert_eq!(server.report_requests(), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockXeroServer::start().await;
        server.push_report_response("T1", "6004", 2025, 6, 401, "");
        server.push_report_response("T1", "6005", 2025, 6, 403, "");
        let fetcher = ReportFetcher::new(client(&server), &settings(1));

        assert_eq!(
            fetcher.fetch_amount(&request("6004", 6), "access").await,
            Err(FetchError::Unauthorized)
        );
        assert_eq!(
            fetcher.fetch_amount(&request("6005", 6), "access").await,
            Err(FetchError::Rejected { status: 403 })
        );
        assert_eq!(server.report_requests(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_zero() {
        let server = MockXeroServer::start().await;
        server.push_report_response("T1", "6004", 2025, 7, 200, "<html>oops</html>");
        let fetcher = ReportFetcher::new(client(&server), &settings(1));

        let err = fetcher
            .fetch_amount(&request("6004", 7), "access")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_fetch_grid_respects_concurrency_cap() {
        let server = MockXeroServer::start().await;
        server.set_report_delay(Duration::from_millis(30));
        let fetcher = ReportFetcher::new(client(&server), &settings(2));

        let jobs: Vec<_> = (1..=8)
            .map(|m| ("Food Costs".to_string(), request("6004", m)))
            .collect();
        let fan_out = fetcher
            .fetch_grid(jobs, "access", Instant::now() + Duration::from_secs(10))
            .await;

        assert!(!fan_out.timed_out);
        assert_eq!(fan_out.results.len(), 8);
        assert!(fan_out.results.iter().all(|r| r.outcome == Ok(0.0)));
        assert!(server.max_in_flight() <= 2);
        // Results stay in job order
        let months: Vec<u32> = fan_out.results.iter().map(|r| r.request.month).collect();
        assert_eq!(months, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_fetch_grid_times_out_outstanding_requests() {
        let server = MockXeroServer::start().await;
        server.set_report_delay(Duration::from_secs(5));
        let fetcher = ReportFetcher::new(client(&server), &settings(4));

        let jobs: Vec<_> = (1..=3)
            .map(|m| ("Food Costs".to_string(), request("6004", m)))
            .collect();
        let fan_out = fetcher
            .fetch_grid(jobs, "access", Instant::now() + Duration::from_millis(100))
            .await;

        assert!(fan_out.timed_out);
        assert_eq!(fan_out.results.len(), 3);
        assert!(fan_out
            .results
            .iter()
            .all(|r| r.outcome == Err(CellFailure::TimedOut)));
    }
}
