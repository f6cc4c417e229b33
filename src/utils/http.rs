// src/utils/http.rs

//! HTTP client utilities.
//!
//! [`PoliteClient`] wraps a `reqwest::Client` with the politeness rules every
//! source adapter shares: a minimum gap between requests, bounded retries with
//! exponential backoff on transient failures, and a per-fetch failure budget.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{HttpConfig, Source};

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Failure ceiling for one fetch invocation.
///
/// Every request is counted, but only failed ones are charged against `max`,
/// so a healthy walk can run any number of pages.
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    sent: u32,
    failed: u32,
    max: u32,
}

impl AttemptBudget {
    pub fn new(max: u32) -> Self {
        Self {
            sent: 0,
            failed: 0,
            max,
        }
    }

    /// Requests sent so far.
    pub fn used(&self) -> u32 {
        self.sent
    }

    /// Failed requests so far.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Charge one failed request; false once the ceiling is reached.
    fn charge_failure(&mut self) -> bool {
        self.failed += 1;
        self.failed < self.max
    }
}

/// Rate-limited, retrying HTTP client bound to one source.
pub struct PoliteClient {
    client: Client,
    source: Source,
    delay: Duration,
    max_retries: u32,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl PoliteClient {
    /// Create a client for `source` from the shared HTTP settings.
    pub fn new(source: Source, config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            source,
            delay: Duration::from_millis(config.request_delay_ms),
            max_retries: config.max_retries,
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Fresh failure budget for one fetch invocation.
    pub fn budget(&self) -> AttemptBudget {
        AttemptBudget::new(self.max_attempts)
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &Url, budget: &mut AttemptBudget) -> Result<String> {
        let mut retries = 0;
        loop {
            match self.send_once(url, budget).await {
                Attempt::Done(body) => return Ok(body),
                Attempt::Transient { reason, retry_after } => {
                    if !budget.charge_failure() {
                        return Err(AppError::fetch_failed(
                            self.source,
                            budget.used(),
                            format!(
                                "{reason} (failure budget of {} requests exhausted)",
                                self.max_attempts
                            ),
                        ));
                    }
                    if retries >= self.max_retries {
                        return Err(AppError::fetch_failed(self.source, budget.used(), reason));
                    }
                    retries += 1;
                    let wait = retry_after.unwrap_or_else(|| self.backoff(retries));
                    log::debug!(
                        "[{}] {} (retry {}/{} in {:?})",
                        self.source,
                        reason,
                        retries,
                        self.max_retries,
                        wait
                    );
                    sleep(wait).await;
                }
                Attempt::Fatal(reason) => {
                    budget.charge_failure();
                    return Err(AppError::fetch_failed(self.source, budget.used(), reason));
                }
            }
        }
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        budget: &mut AttemptBudget,
    ) -> Result<T> {
        let body = self.get_text(url, budget).await?;
        serde_json::from_str(&body).map_err(|e| {
            AppError::fetch_failed(
                self.source,
                budget.used(),
                format!("undecodable response from {url}: {e}"),
            )
        })
    }

    async fn send_once(&self, url: &Url, budget: &mut AttemptBudget) -> Attempt {
        self.pace().await;
        budget.record_sent();

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Attempt::transient(format!("request to {url} failed: {e}"));
            }
            Err(e) => return Attempt::Fatal(format!("request to {url} failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return match response.text().await {
                Ok(body) => Attempt::Done(body),
                Err(e) => Attempt::transient(format!("reading body of {url}: {e}")),
            };
        }

        let reason = format!("HTTP {status} from {url}");
        if is_transient(status) {
            let retry_after = retry_after(&response).map(|wait| wait.min(self.backoff_max));
            Attempt::Transient {
                reason,
                retry_after,
            }
        } else {
            Attempt::Fatal(reason)
        }
    }

    /// Wait until at least `delay` has passed since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.delay).await;
        }
        *last = Some(Instant::now());
    }

    /// Backoff before retry number `retry` (1-based).
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

enum Attempt {
    Done(String),
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

impl Attempt {
    fn transient(reason: String) -> Self {
        Attempt::Transient {
            reason,
            retry_after: None,
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}


#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::testing::fast_config;
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = HttpConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            ..HttpConfig::default()
        };
        let client = PoliteClient::new(Source::Arxiv, &config).unwrap();
        assert_eq!(client.backoff(1), Duration::from_millis(100));
        assert_eq!(client.backoff(2), Duration::from_millis(200));
        assert_eq!(client.backoff(3), Duration::from_millis(350));
        assert_eq!(client.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_budget_charges_only_failures() {
        let mut budget = AttemptBudget::new(2);
        budget.record_sent();
        budget.record_sent();
        assert!(budget.charge_failure());
        assert!(!budget.charge_failure());
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.failed(), 2);
    }

    #[tokio::test]
    async fn test_successes_do_not_consume_budget() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/details")
            .with_status(200)
            .with_body("ok")
            .expect(5)
            .create_async()
            .await;
        let config = HttpConfig {
            max_attempts: 1,
            ..fast_config()
        };
        let client = PoliteClient::new(Source::Biorxiv, &config).unwrap();
        let mut budget = client.budget();
        let url = Url::parse(&format!("{}/details", server.url())).unwrap();

        for _ in 0..5 {
            assert_eq!(client.get_text(&url, &mut budget).await.unwrap(), "ok");
        }
        mock.assert_async().await;
        assert_eq!(budget.used(), 5);
        assert_eq!(budget.failed(), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mut server = Server::new_async().await;
        let unavailable = server
            .mock("GET", "/details")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let throttled = server
            .mock("GET", "/details")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/details")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create_async()
            .await;
        let client = PoliteClient::new(Source::Biorxiv, &fast_config()).unwrap();
        let mut budget = client.budget();
        let url = Url::parse(&format!("{}/details", server.url())).unwrap();

        let value: serde_json::Value = client.get_json(&url, &mut budget).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(budget.used(), 3);
        assert_eq!(budget.failed(), 2);
        unavailable.assert_async().await;
        throttled.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/items")
            .with_status(404)
            .with_body("missing")
            .expect(1)
            .create_async()
            .await;
        let client = PoliteClient::new(Source::Chemrxiv, &fast_config()).unwrap();
        let mut budget = client.budget();
        let url = Url::parse(&format!("{}/items", server.url())).unwrap();

        let err = client.get_text(&url, &mut budget).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::FetchFailed {
                origin: Source::Chemrxiv,
                attempts: 1,
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retry_limit_ends_in_fetch_failed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let config = HttpConfig {
            max_retries: 2,
            ..fast_config()
        };
        let client = PoliteClient::new(Source::Arxiv, &config).unwrap();
        let mut budget = client.budget();
        let url = Url::parse(&format!("{}/api/query", server.url())).unwrap();

        let err = client.get_text(&url, &mut budget).await.unwrap_err();
        assert!(matches!(err, AppError::FetchFailed { attempts: 3, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_budget_stops_retries() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let config = HttpConfig {
            max_retries: 10,
            max_attempts: 2,
            ..fast_config()
        };
        let client = PoliteClient::new(Source::Arxiv, &config).unwrap();
        let mut budget = client.budget();
        let url = Url::parse(&format!("{}/api/query", server.url())).unwrap();

        let err = client.get_text(&url, &mut budget).await.unwrap_err();
        assert!(matches!(err, AppError::FetchFailed { attempts: 2, .. }));
        mock.assert_async().await;
    }
}
