//! Xero API client
//!
//! Covers the three endpoints the sync needs:
//! - `token` - refresh-token exchange against the identity server
//! - `connections` - tenants reachable with an access token
//! - `reports` - single-month Profit & Loss filtered to one account code
//!
//! Report and connection requests go through one retry loop: 429, 5xx and
//! network errors back off exponentially up to the configured attempt cap;
//! 401 and other 4xx responses are returned immediately.

mod connections;
mod pacer;
mod reports;
mod token;

pub use connections::stored_tenants;
pub use pacer::RequestPacer;
pub use reports::{FanOut, ReportFetcher};
pub use token::{TokenPair, TokenRefresher};

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::{RetryPolicy, SyncConfig, XeroEndpoints};
use crate::error::{FetchError, Result};

/// Longest response snippet kept in error messages
const BODY_SNIPPET_LEN: usize = 200;

/// HTTP client for the Xero identity and accounting APIs
#[derive(Clone)]
pub struct XeroClient {
    http: Client,
    endpoints: XeroEndpoints,
    retry: RetryPolicy,
}

/// What one HTTP attempt resolved to
enum Attempt {
    Done(String),
    Retry {
        rate_limited: bool,
        retry_after: Option<Duration>,
        message: String,
    },
    Fail(FetchError),
}

impl XeroClient {
    pub fn new(endpoints: XeroEndpoints, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(endpoints.request_timeout)
            .user_agent(concat!("centre-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoints,
            retry,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.xero.clone(), config.sync.retry.clone())
    }

    pub fn endpoints(&self) -> &XeroEndpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Send a request, retrying 429 / 5xx / network failures with exponential backoff
    ///
    /// `build` is called once per attempt. When a pacer is given every attempt
    /// waits for its slot, so retries count against the request quota too.
    pub(crate) async fn send_with_retry<F>(
        &self,
        build: F,
        pacer: Option<&RequestPacer>,
    ) -> std::result::Result<String, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if let Some(pacer) = pacer {
                pacer.wait().await;
            }

            let outcome = match build().send().await {
                Ok(response) => classify_response(response).await,
                Err(e) => Attempt::Retry {
                    rate_limited: false,
                    retry_after: None,
                    message: e.to_string(),
                },
            };

            match outcome {
                Attempt::Done(body) => return Ok(body),
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry {
                    rate_limited,
                    retry_after,
                    message,
                } => {
                    if attempt >= max_attempts {
                        warn!(attempt, "Giving up after {} attempts: {}", attempt, message);
                        return Err(if rate_limited {
                            FetchError::RateLimited { attempts: attempt }
                        } else {
                            FetchError::Transient {
                                attempts: attempt,
                                message,
                            }
                        });
                    }

                    let mut delay = self.retry.backoff(attempt);
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint).min(self.retry.max_backoff);
                    }
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after: {}",
                        message
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn classify_response(response: Response) -> Attempt {
    let status = response.status();

    if status.is_success() {
        return match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(e) => Attempt::Retry {
                rate_limited: false,
                retry_after: None,
                message: format!("failed to read body: {}", e),
            },
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Attempt::Retry {
            rate_limited: true,
            retry_after,
            message: "HTTP 429 Too Many Requests".to_string(),
        };
    }

    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Attempt::Retry {
            rate_limited: false,
            retry_after: None,
            message: format!("HTTP {}: {}", status.as_u16(), snippet(&body)),
        };
    }

    if status == StatusCode::UNAUTHORIZED {
        return Attempt::Fail(FetchError::Unauthorized);
    }

    Attempt::Fail(FetchError::Rejected {
        status: status.as_u16(),
    })
}

/// First few hundred characters of a body, for logs and error messages
pub(crate) fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("  short  "), "short");
        let long = "é".repeat(BODY_SNIPPET_LEN + 10);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), BODY_SNIPPET_LEN + 3);
    }
}
